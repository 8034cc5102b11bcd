use anyhow::Result;
use mvrewrite::catalog::{InMemoryVersions, MvCatalog};
use mvrewrite::query::planner::builder::{col, count_star, gt, lit, sum, PlanBuilder};
use mvrewrite::query::planner::OperatorNode;
use mvrewrite::query::rewrite::trace::StageVerdict;
use mvrewrite::query::RewriteConfig;
use mvrewrite::{RejectionReason, RewriteError};

#[path = "../common/mod.rs"]
mod common;
use common::{partition, run_rewrite, setup_catalog, EMPS_COLUMNS};

fn register_view(catalog: &MvCatalog, versions: &InMemoryVersions) -> Result<()> {
    let plan = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "s"), count_star("n")])
        .build();
    catalog.register_view("by_dept", plan, versions)?;
    Ok(())
}

fn query() -> OperatorNode {
    PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "s")])
        .build()
}

fn tolerant(versions: u64) -> RewriteConfig {
    RewriteConfig {
        staleness_tolerance_versions: Some(versions),
        ..RewriteConfig::default()
    }
}

#[test]
fn test_every_write_makes_view_stale() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_view(&catalog, &versions)?;
    let snapshot = catalog.snapshot();

    assert!(run_rewrite(&query(), &snapshot, &RewriteConfig::default(), &versions)?.is_rewritten());

    for expected in 2..5 {
        versions.bump(&partition("emps", "p1"));
        let result = run_rewrite(&query(), &snapshot, &RewriteConfig::default(), &versions)?;
        assert!(!result.is_rewritten());
        assert_eq!(
            result.rejection_for("by_dept"),
            Some(&RejectionReason::Stale {
                partition: partition("emps", "p1"),
                captured: Some(1),
                current: expected
            })
        );
    }
    Ok(())
}

#[test]
fn test_tolerance_bounds_the_lag() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_view(&catalog, &versions)?;
    let snapshot = catalog.snapshot();

    versions.bump(&partition("emps", "p1"));
    versions.bump(&partition("emps", "p2"));
    versions.bump(&partition("emps", "p2"));

    let result = run_rewrite(&query(), &snapshot, &tolerant(2), &versions)?;
    assert!(result.is_rewritten());
    assert_eq!(
        result.trace().view("by_dept").unwrap().freshness,
        StageVerdict::PassedWithNote("2 version(s) behind, within tolerance".to_string())
    );

    let result = run_rewrite(&query(), &snapshot, &tolerant(1), &versions)?;
    assert!(matches!(
        result.rejection_for("by_dept"),
        Some(RejectionReason::Stale { current: 3, .. })
    ));
    Ok(())
}

#[test]
fn test_new_partition_is_never_tolerated() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_view(&catalog, &versions)?;
    let p3 = catalog.add_partition("emps", "p3")?;
    versions.set(p3.clone(), 1);

    let result = run_rewrite(&query(), &catalog.snapshot(), &tolerant(1000), &versions)?;
    assert_eq!(
        result.rejection_for("by_dept"),
        Some(&RejectionReason::Stale {
            partition: p3,
            captured: None,
            current: 1
        })
    );

    catalog.refresh_view("by_dept", &versions)?;
    assert!(run_rewrite(&query(), &catalog.snapshot(), &RewriteConfig::default(), &versions)?.is_rewritten());
    Ok(())
}

#[test]
fn test_unrelated_table_writes_ignored() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_view(&catalog, &versions)?;
    versions.bump(&partition("depts", "p1"));

    let result = run_rewrite(&query(), &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    assert!(result.is_rewritten());
    Ok(())
}

#[test]
fn test_partition_without_version_is_fatal() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_view(&catalog, &versions)?;
    // the oracle never hears about p3
    catalog.add_partition("emps", "p3")?;

    let err = run_rewrite(&query(), &catalog.snapshot(), &RewriteConfig::default(), &versions).unwrap_err();
    assert_eq!(
        err.downcast_ref::<RewriteError>(),
        Some(&RewriteError::MissingPartition {
            table: "emps".to_string(),
            partition: partition("emps", "p3")
        })
    );
    Ok(())
}

#[test]
fn test_staleness_checked_only_after_match() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_view(&catalog, &versions)?;
    catalog.add_partition("emps", "p3")?;

    // no aggregation: the view is rejected before freshness is consulted
    let plain = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .filter(gt(col("emps.salary"), lit(1)))
        .build();
    let result = run_rewrite(&plain, &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    let trace = result.trace().view("by_dept").unwrap();
    assert!(trace.structural.is_rejected());
    assert_eq!(trace.freshness, StageVerdict::NotReached);
    Ok(())
}
