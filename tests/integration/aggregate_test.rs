use anyhow::Result;
use mvrewrite::catalog::{InMemoryVersions, MvCatalog};
use mvrewrite::query::planner::builder::{
    avg, col, count, count_distinct, count_star, div, eq, func, gt, lit, max, min, plus, sum, PlanBuilder,
};
use mvrewrite::query::planner::logical::group_key_output;
use mvrewrite::query::planner::{AggregateCall, ColumnRef, Expression, OperatorNode, ProjectItem};
use mvrewrite::query::{RewriteConfig, RewriteResult};
use mvrewrite::RejectionReason;

#[path = "../common/mod.rs"]
mod common;
use common::{database_for, run_rewrite, setup_catalog, EMPS_COLUMNS};

fn emps() -> PlanBuilder {
    PlanBuilder::scan("emps", &EMPS_COLUMNS)
}

/// Registers one aggregate view over `emps`
fn with_view(
    name: &str,
    keys: Vec<Expression>,
    aggregates: Vec<AggregateCall>,
) -> Result<(MvCatalog, InMemoryVersions)> {
    let (catalog, versions) = setup_catalog()?;
    catalog.register_view(name, emps().aggregate(keys, aggregates).build(), &versions)?;
    Ok((catalog, versions))
}

/// Rewrites `query` and checks the rewritten plan returns the same rows
fn rewrite_and_compare(catalog: &MvCatalog, versions: &InMemoryVersions, query: &OperatorNode) -> Result<RewriteResult> {
    let snapshot = catalog.snapshot();
    let result = run_rewrite(query, &snapshot, &RewriteConfig::default(), versions)?;
    let db = database_for(&snapshot);
    assert_eq!(
        db.evaluate(result.plan()).sorted_rows(),
        db.evaluate(query).sorted_rows(),
        "rewritten plan:\n{}",
        result.plan()
    );
    Ok(result)
}

fn sum_count_view() -> Result<(MvCatalog, InMemoryVersions)> {
    with_view(
        "mv",
        vec![col("emps.dept"), col("emps.commission")],
        vec![
            sum(col("emps.salary"), "s"),
            count(col("emps.salary"), "c"),
            count_star("n"),
            min(col("emps.salary"), "lo"),
            max(col("emps.salary"), "hi"),
        ],
    )
}

#[test]
fn test_avg_from_sum_and_count_with_rollup() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .aggregate(vec![col("emps.dept")], vec![avg(col("emps.salary"), "a")])
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;

    let RewriteResult::Rewritten { compensation, .. } = &result else {
        panic!("expected a rewrite: {:?}", result.rejections());
    };
    let rollup = compensation.rollup.as_ref().expect("coarser grouping needs a rollup");
    assert_eq!(rollup.group_by, vec![col("mv.dept")]);
    assert_eq!(compensation.project[1].expr, div(col("_rollup0"), col("_rollup1")));
    Ok(())
}

#[test]
fn test_avg_same_grouping_divides_columns() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .aggregate(
            vec![col("emps.commission"), col("emps.dept")],
            vec![avg(col("emps.salary"), "a")],
        )
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;

    let RewriteResult::Rewritten { compensation, .. } = &result else {
        panic!("expected a rewrite: {:?}", result.rejections());
    };
    assert!(compensation.rollup.is_none());
    assert_eq!(compensation.project[2].expr, div(col("mv.s"), col("mv.c")));
    Ok(())
}

#[test]
fn test_count_distinct_never_from_coarser_grouping() -> Result<()> {
    let (catalog, versions) = with_view(
        "mv",
        vec![col("emps.dept"), col("emps.commission")],
        vec![count_distinct(col("emps.empid"), "ids"), count_star("n")],
    )?;
    let query = emps()
        .aggregate(vec![col("emps.dept")], vec![count_distinct(col("emps.empid"), "ids")])
        .build();
    let result = run_rewrite(&query, &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    assert!(!result.is_rewritten());
    assert_eq!(
        result.rejection_for("mv"),
        Some(&RejectionReason::IncompatibleAggregate {
            function: "COUNT(DISTINCT emps.empid)".to_string()
        })
    );

    // identical grouping reads the stored distinct count
    let query = emps()
        .aggregate(
            vec![col("emps.dept"), col("emps.commission")],
            vec![count_distinct(col("emps.empid"), "ids")],
        )
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;
    assert!(result.is_rewritten());
    Ok(())
}

#[test]
fn test_count_distinct_not_derived_from_plain_count() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .aggregate(
            vec![col("emps.dept"), col("emps.commission")],
            vec![count_distinct(col("emps.salary"), "d")],
        )
        .build();
    let result = run_rewrite(&query, &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    assert!(matches!(
        result.rejection_for("mv"),
        Some(RejectionReason::IncompatibleAggregate { .. })
    ));
    Ok(())
}

#[test]
fn test_global_count_over_empty_selection() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .filter(eq(col("emps.dept"), lit("nobody")))
        .aggregate(vec![], vec![count_star("n"), sum(col("emps.salary"), "s")])
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;

    let RewriteResult::Rewritten { compensation, .. } = &result else {
        panic!("expected a rewrite: {:?}", result.rejections());
    };
    assert_eq!(compensation.filter, Some(eq(col("mv.dept"), lit("nobody"))));
    assert_eq!(
        compensation.project[0].expr,
        func("coalesce", vec![col("_rollup0"), lit(0)])
    );
    Ok(())
}

#[test]
fn test_min_max_rollup() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .aggregate(
            vec![col("emps.commission")],
            vec![min(col("emps.salary"), "lo"), max(col("emps.salary"), "hi"), count_star("n")],
        )
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;
    assert!(result.is_rewritten());
    Ok(())
}

#[test]
fn test_group_by_expression_over_view_key() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .aggregate(
            vec![func("upper", vec![col("emps.dept")])],
            vec![sum(col("emps.salary"), "s")],
        )
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;
    assert!(result.is_rewritten());
    Ok(())
}

#[test]
fn test_expression_key_read_by_name_above_rewrite() -> Result<()> {
    let (catalog, versions) = with_view(
        "mv",
        vec![col("emps.time"), col("emps.commission")],
        vec![sum(col("emps.salary"), "s")],
    )?;
    let key = plus(col("emps.time"), col("emps.commission"));
    let query = emps()
        .aggregate(vec![key.clone()], vec![sum(col("emps.salary"), "total")])
        .project(vec![
            ProjectItem::column(group_key_output(&key)),
            ProjectItem::column(ColumnRef::bare("total")),
        ])
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;
    assert!(result.is_rewritten(), "{:?}", result.rejections());
    assert_eq!(result.plan().output_columns(), query.output_columns());

    let db = database_for(&catalog.snapshot());
    assert_eq!(db.evaluate(result.plan()).columns, db.evaluate(&query).columns);
    Ok(())
}

#[test]
fn test_expression_key_view_serves_reordered_key() -> Result<()> {
    let (catalog, versions) = with_view(
        "mv",
        vec![plus(col("emps.commission"), col("emps.time")), col("emps.dept")],
        vec![sum(col("emps.salary"), "s")],
    )?;
    let query = emps()
        .aggregate(
            vec![plus(col("emps.time"), col("emps.commission"))],
            vec![sum(col("emps.salary"), "total")],
        )
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;
    assert!(result.is_rewritten(), "{:?}", result.rejections());
    assert_eq!(result.plan().output_columns(), query.output_columns());
    Ok(())
}

#[test]
fn test_constant_key_needs_no_rollup() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .filter(eq(col("emps.dept"), lit("eng")))
        .aggregate(vec![col("emps.commission")], vec![sum(col("emps.salary"), "s")])
        .build();
    let result = rewrite_and_compare(&catalog, &versions, &query)?;

    let RewriteResult::Rewritten { compensation, .. } = &result else {
        panic!("expected a rewrite: {:?}", result.rejections());
    };
    assert!(compensation.rollup.is_none());
    Ok(())
}

#[test]
fn test_finer_query_grouping_rejected() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .aggregate(vec![col("emps.salary")], vec![count_star("n")])
        .build();
    let result = run_rewrite(&query, &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    assert_eq!(
        result.rejection_for("mv"),
        Some(&RejectionReason::GroupingNotDerivable {
            key: "emps.salary".to_string()
        })
    );
    Ok(())
}

#[test]
fn test_filter_on_aggregated_column_rejected() -> Result<()> {
    let (catalog, versions) = sum_count_view()?;
    let query = emps()
        .filter(gt(col("emps.salary"), lit(10)))
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "s")])
        .build();
    let result = run_rewrite(&query, &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    assert!(matches!(
        result.rejection_for("mv"),
        Some(RejectionReason::UnexpressibleCompensation { .. })
    ));
    Ok(())
}

#[test]
fn test_global_view_cannot_feed_groups() -> Result<()> {
    let (catalog, versions) = with_view("total", vec![], vec![sum(col("emps.salary"), "s")])?;
    let grouped = emps()
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "s")])
        .build();
    let result = run_rewrite(&grouped, &catalog.snapshot(), &RewriteConfig::default(), &versions)?;
    assert!(matches!(
        result.rejection_for("total"),
        Some(RejectionReason::GroupingNotDerivable { .. })
    ));

    let global = emps().aggregate(vec![], vec![sum(col("emps.salary"), "s")]).build();
    let result = rewrite_and_compare(&catalog, &versions, &global)?;
    assert!(result.is_rewritten());
    Ok(())
}
