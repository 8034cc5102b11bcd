use anyhow::Result;
use mvrewrite::catalog::MvCatalog;
use mvrewrite::catalog::InMemoryVersions;
use mvrewrite::query::planner::builder::{and, col, count, func, gt, lit, sum, PlanBuilder};
use mvrewrite::query::planner::{HeuristicStatistics, OperatorNode, ProjectItem};
use mvrewrite::query::rewrite::trace::StageVerdict;
use mvrewrite::query::{rewrite, RewriteConfig, RewriteResult};
use mvrewrite::RejectionReason;

#[path = "../common/mod.rs"]
mod common;
use common::{database_for, init_logger, partition, run_rewrite, setup_catalog, EMPS_COLUMNS};

const VIEW: &str = "m";

/// `SELECT dept, commission, SUM(salary) FROM emps GROUP BY dept, commission`
fn register_dept_commission_view(catalog: &MvCatalog, versions: &InMemoryVersions) -> Result<()> {
    let plan = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(
            vec![col("emps.dept"), col("emps.commission")],
            vec![sum(col("emps.salary"), "total_salary")],
        )
        .build();
    catalog.register_view(VIEW, plan, versions)?;
    Ok(())
}

/// `SELECT * FROM emps ORDER BY empid`; ordering is not part of the plan model
fn select_star() -> OperatorNode {
    PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .project_columns(EMPS_COLUMNS.iter().map(|c| col(&format!("emps.{}", c))).collect())
        .build()
}

/// `SELECT dept, SUM(salary) FROM emps GROUP BY dept HAVING SUM(salary) > 10`
fn dept_totals_having() -> OperatorNode {
    PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "total")])
        .filter(gt(col("total"), lit(10)))
        .build()
}

#[test]
fn test_end_to_end_scenario() -> Result<()> {
    init_logger();
    let (catalog, versions) = setup_catalog()?;
    register_dept_commission_view(&catalog, &versions)?;

    // rows land in a partition the view has never captured
    let p3 = catalog.add_partition("emps", "p3")?;
    versions.set(p3.clone(), 1);

    let config = RewriteConfig::default();

    let result = run_rewrite(&select_star(), &catalog.snapshot(), &config, &versions)?;
    assert!(!result.is_rewritten());
    assert_eq!(result.plan(), &select_star());
    assert!(matches!(
        result.rejection_for(VIEW),
        Some(RejectionReason::NoStructuralMatch { .. })
    ));

    let result = run_rewrite(&dept_totals_having(), &catalog.snapshot(), &config, &versions)?;
    assert!(!result.is_rewritten());
    assert_eq!(
        result.rejection_for(VIEW),
        Some(&RejectionReason::Stale {
            partition: p3.clone(),
            captured: None,
            current: 1
        })
    );

    // once the refresh collaborator catches up the view serves the query
    catalog.refresh_view(VIEW, &versions)?;
    let snapshot = catalog.snapshot();
    let result = run_rewrite(&dept_totals_having(), &snapshot, &config, &versions)?;
    assert!(result.is_rewritten());
    assert_eq!(result.chosen_view(), Some(VIEW));
    assert!(result.rejections().is_empty());

    let plan = result.plan();
    let OperatorNode::Filter { predicate, input } = plan else {
        panic!("expected the HAVING filter on top, got\n{}", plan);
    };
    assert_eq!(predicate, &gt(col("total"), lit(10)));
    let OperatorNode::Project { input, .. } = input.as_ref() else {
        panic!("expected a projection under the filter, got\n{}", plan);
    };
    let OperatorNode::Aggregate { group_by, aggregates, input } = input.as_ref() else {
        panic!("expected a re-aggregation, got\n{}", plan);
    };
    assert_eq!(group_by, &vec![col("m.dept")]);
    assert_eq!(aggregates.len(), 1);
    assert_eq!(input.as_ref(), &snapshot.view(VIEW).unwrap().scan_node());

    let db = database_for(&snapshot);
    let expected = db.evaluate(&dept_totals_having());
    let actual = db.evaluate(plan);
    assert_eq!(actual.columns, expected.columns);
    assert_eq!(actual.sorted_rows(), expected.sorted_rows());

    Ok(())
}

#[test]
fn test_rewrite_is_deterministic() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_dept_commission_view(&catalog, &versions)?;
    // a second view with the same shape ties on cost
    let plan = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(
            vec![col("emps.commission"), col("emps.dept")],
            vec![sum(col("emps.salary"), "s"), count(col("emps.salary"), "c")],
        )
        .build();
    catalog.register_view("a_view", plan, &versions)?;

    let snapshot = catalog.snapshot();
    let config = RewriteConfig::default();
    let first = run_rewrite(&dept_totals_having(), &snapshot, &config, &versions)?;
    for _ in 0..5 {
        assert_eq!(run_rewrite(&dept_totals_having(), &snapshot, &config, &versions)?, first);
    }
    assert_eq!(first.chosen_view(), Some("a_view"));
    assert!(matches!(
        first.rejection_for(VIEW),
        Some(RejectionReason::LostOnCost { winner, .. }) if winner == "a_view"
    ));
    Ok(())
}

#[test]
fn test_repeated_random_filter_survives_rewrite() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_dept_commission_view(&catalog, &versions)?;
    let draw = gt(func("random", vec![]), lit(0.5));
    let query = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "total")])
        .filter(and(draw.clone(), draw))
        .build();

    let result = run_rewrite(&query, &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    assert!(result.is_rewritten(), "{:?}", result.rejections());
    let OperatorNode::Filter { predicate, .. } = result.plan() else {
        panic!("expected the filter to stay on top:\n{}", result.plan());
    };
    assert_eq!(predicate.split_conjunction().len(), 2);
    Ok(())
}

#[test]
fn test_cheaper_view_wins() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_dept_commission_view(&catalog, &versions)?;
    let exact = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "total")])
        .build();
    catalog.register_view("z_exact", exact, &versions)?;

    let stats = HeuristicStatistics::new()
        .with_table(VIEW, 5000.0)
        .with_table("z_exact", 10.0);
    let result = rewrite(
        &dept_totals_having(),
        &catalog.snapshot(),
        &RewriteConfig::default(),
        &stats,
        &versions,
    )?;
    assert_eq!(result.chosen_view(), Some("z_exact"));
    let RewriteResult::Rewritten { compensation, .. } = &result else {
        panic!("expected a rewrite");
    };
    assert!(compensation.rollup.is_none());

    let trace = result.trace();
    assert_eq!(trace.chosen(), Some("z_exact"));
    let loser = trace.view(VIEW).unwrap();
    assert!(matches!(loser.compatibility, StageVerdict::PassedWithNote(_)));
    assert!(loser.cost.unwrap() > trace.view("z_exact").unwrap().cost.unwrap());
    Ok(())
}

#[test]
fn test_rewrite_below_join() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    let view = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .filter(gt(col("emps.salary"), lit(10)))
        .build();
    catalog.register_view("high_paid", view, &versions)?;

    let query = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .filter(gt(col("emps.salary"), lit(25)))
        .inner_join(
            PlanBuilder::scan("depts", &["dept", "region"]),
            mvrewrite::query::planner::builder::eq(col("emps.dept"), col("depts.dept")),
        )
        .project(vec![
            ProjectItem::column(mvrewrite::query::planner::ColumnRef::new("emps", "empid")),
            ProjectItem::column(mvrewrite::query::planner::ColumnRef::new("depts", "region")),
        ])
        .build();

    let snapshot = catalog.snapshot();
    let result = run_rewrite(&query, &snapshot, &RewriteConfig::default(), &versions)?;
    assert!(result.is_rewritten());
    assert!(result.plan().scanned_tables().contains("high_paid"));
    assert!(result.plan().scanned_tables().contains("depts"));

    let db = database_for(&snapshot);
    assert_eq!(db.evaluate(result.plan()).sorted_rows(), db.evaluate(&query).sorted_rows());
    Ok(())
}

#[test]
fn test_partition_write_after_capture() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    register_dept_commission_view(&catalog, &versions)?;
    let held = catalog.snapshot();

    versions.bump(&partition("emps", "p2"));
    let result = run_rewrite(&dept_totals_having(), &held, &RewriteConfig::default(), &versions)?;
    assert_eq!(
        result.rejection_for(VIEW),
        Some(&RejectionReason::Stale {
            partition: partition("emps", "p2"),
            captured: Some(1),
            current: 2
        })
    );
    assert!(result.trace().view(VIEW).unwrap().freshness.is_rejected());
    Ok(())
}
