use std::sync::Arc;
use std::thread;

use anyhow::Result;
use mvrewrite::query::planner::builder::{col, eq, sum, PlanBuilder};
use mvrewrite::query::planner::OperatorNode;
use mvrewrite::query::RewriteConfig;
use mvrewrite::CatalogError;

#[path = "../common/mod.rs"]
mod common;
use common::{partition, run_rewrite, setup_catalog, EMPS_COLUMNS};

fn definition() -> OperatorNode {
    PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "s")])
        .build()
}

#[test]
fn test_held_snapshot_is_unaffected_by_mutations() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    catalog.register_view("mv", definition(), &versions)?;
    let held = catalog.snapshot();

    catalog.drop_view("mv")?;
    catalog.add_partition("emps", "p3")?;

    assert_eq!(held.view_count(), 1);
    assert_eq!(held.table("emps").unwrap().partitions().len(), 2);
    let current = catalog.snapshot();
    assert_eq!(current.view_count(), 0);
    assert_eq!(current.table("emps").unwrap().partitions().len(), 3);
    assert!(current.version() > held.version());

    // the held snapshot still serves rewrites
    assert!(run_rewrite(&definition(), &held, &RewriteConfig::default(), &versions)?.is_rewritten());
    Ok(())
}

#[test]
fn test_refresh_replaces_captured_versions() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    let before = catalog.register_view("mv", definition(), &versions)?;
    versions.bump(&partition("emps", "p1"));
    let after = catalog.refresh_view("mv", &versions)?;

    assert_eq!(before.captured_version(&partition("emps", "p1")), Some(1));
    assert_eq!(after.captured_version(&partition("emps", "p1")), Some(2));
    assert_eq!(after.definition(), before.definition());
    Ok(())
}

#[test]
fn test_catalog_errors() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    assert_eq!(
        catalog.refresh_view("missing", &versions).unwrap_err(),
        CatalogError::ViewNotFound("missing".to_string())
    );
    assert_eq!(
        catalog.drop_view("missing").unwrap_err(),
        CatalogError::ViewNotFound("missing".to_string())
    );
    assert_eq!(
        catalog.add_partition("emps", "p1").unwrap_err(),
        CatalogError::PartitionAlreadyExists(partition("emps", "p1"))
    );

    let duplicate = PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .inner_join(
            PlanBuilder::scan("depts", &["dept", "region"]),
            eq(col("emps.dept"), col("depts.dept")),
        )
        .build();
    assert_eq!(
        catalog.register_view("joined", duplicate, &versions).unwrap_err(),
        CatalogError::DuplicateOutputColumn {
            view: "joined".to_string(),
            column: "dept".to_string()
        }
    );
    Ok(())
}

#[test]
fn test_concurrent_readers_see_whole_snapshots() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    let catalog = Arc::new(catalog);
    let versions = Arc::new(versions);

    let writer = {
        let catalog = Arc::clone(&catalog);
        let versions = Arc::clone(&versions);
        thread::spawn(move || -> Result<(), CatalogError> {
            for i in 0..50 {
                catalog.register_view(&format!("mv_{:02}", i), definition(), versions.as_ref())?;
            }
            Ok(())
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                let mut last_version = 0;
                for _ in 0..200 {
                    let snapshot = catalog.snapshot();
                    assert!(snapshot.version() >= last_version);
                    last_version = snapshot.version();
                    // every published view is complete
                    for view in snapshot.views() {
                        assert_eq!(view.captured().len(), 2);
                        assert!(view.is_aggregate());
                    }
                }
            })
        })
        .collect();

    writer.join().expect("writer panicked")?;
    for reader in readers {
        reader.join().expect("reader panicked");
    }
    assert_eq!(catalog.snapshot().view_count(), 50);
    Ok(())
}

#[test]
fn test_concurrent_rewrites_share_snapshot() -> Result<()> {
    let (catalog, versions) = setup_catalog()?;
    catalog.register_view("mv", definition(), &versions)?;
    let snapshot = catalog.snapshot();
    let versions = Arc::new(versions);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let snapshot = Arc::clone(&snapshot);
            let versions = Arc::clone(&versions);
            thread::spawn(move || {
                run_rewrite(&definition(), &snapshot, &RewriteConfig::default(), &versions)
                    .map(|r| r.chosen_view().map(str::to_string))
            })
        })
        .collect();

    for handle in handles {
        let chosen = handle.join().expect("rewrite thread panicked")?;
        assert_eq!(chosen.as_deref(), Some("mv"));
    }
    Ok(())
}
