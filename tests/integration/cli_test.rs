use std::io::Write;
use std::process::Command;

use anyhow::Result;
use mvrewrite::query::planner::builder::{col, gt, lit, sum, PlanBuilder};
use mvrewrite::query::planner::OperatorNode;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

const EMPS_COLUMNS: [&str; 5] = ["empid", "time", "dept", "commission", "salary"];

fn view_plan() -> OperatorNode {
    PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(
            vec![col("emps.dept"), col("emps.commission")],
            vec![sum(col("emps.salary"), "total_salary")],
        )
        .build()
}

fn query_plan() -> OperatorNode {
    PlanBuilder::scan("emps", &EMPS_COLUMNS)
        .aggregate(vec![col("emps.dept")], vec![sum(col("emps.salary"), "total")])
        .filter(gt(col("total"), lit(10)))
        .build()
}

/// Writes a scenario with one table, one view and the given updates
fn scenario_file(updates: Value) -> Result<NamedTempFile> {
    let scenario = json!({
        "tables": [
            { "name": "emps", "partitions": [{ "name": "p1" }, { "name": "p2", "version": 3 }] }
        ],
        "views": [{ "name": "m", "plan": serde_json::to_value(view_plan())? }],
        "query": serde_json::to_value(query_plan())?,
        "updates": updates,
    });
    let mut file = NamedTempFile::new()?;
    file.write_all(serde_json::to_string_pretty(&scenario)?.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn run_mvx(args: &[&str]) -> Result<(bool, String, String)> {
    let output = Command::new(env!("CARGO_BIN_EXE_mvx")).args(args).output()?;
    Ok((
        output.status.success(),
        String::from_utf8(output.stdout)?,
        String::from_utf8(output.stderr)?,
    ))
}

#[test]
fn test_explain_rewritten_query() -> Result<()> {
    let file = scenario_file(json!([]))?;
    let path = file.path().to_string_lossy().to_string();
    let (ok, stdout, stderr) = run_mvx(&["explain", "--scenario", &path])?;

    assert!(ok, "mvx failed: {}", stderr);
    assert!(stdout.starts_with("Rewritten using m"), "unexpected output:\n{}", stdout);
    assert!(stdout.contains("* m"));
    assert!(stdout.contains("re-aggregated to 1 group key(s)"));
    assert!(stdout.contains("chosen: m"));
    assert!(stdout.contains("Plan:"));
    Ok(())
}

#[test]
fn test_explain_stale_view_after_new_partition() -> Result<()> {
    let file = scenario_file(json!([
        { "add_partition": { "table": "emps", "partition": "p3" } }
    ]))?;
    let path = file.path().to_string_lossy().to_string();
    let (ok, stdout, stderr) = run_mvx(&["explain", "--scenario", &path])?;

    assert!(ok, "mvx failed: {}", stderr);
    assert!(stdout.starts_with("Unchanged"), "unexpected output:\n{}", stdout);
    assert!(stdout.contains("Rejections:"));
    assert!(stdout.contains("not covered by the view"));
    assert!(stdout.contains("chosen: none"));
    Ok(())
}

#[test]
fn test_explain_tolerance_flag() -> Result<()> {
    let file = scenario_file(json!([
        { "write": { "table": "emps", "partition": "p1" } },
        { "write": { "table": "emps", "partition": "p1" } }
    ]))?;
    let path = file.path().to_string_lossy().to_string();

    let (_, stdout, _) = run_mvx(&["explain", "--scenario", &path])?;
    assert!(stdout.starts_with("Unchanged"));

    let (ok, stdout, stderr) = run_mvx(&["explain", "--scenario", &path, "--tolerance", "2"])?;
    assert!(ok, "mvx failed: {}", stderr);
    assert!(stdout.starts_with("Rewritten using m"));
    assert!(stdout.contains("2 version(s) behind, within tolerance"));
    Ok(())
}

#[test]
fn test_explain_json_output() -> Result<()> {
    let file = scenario_file(json!([]))?;
    let path = file.path().to_string_lossy().to_string();
    let (ok, stdout, stderr) = run_mvx(&["explain", "--scenario", &path, "--format", "json"])?;
    assert!(ok, "mvx failed: {}", stderr);

    let value: Value = serde_json::from_str(&stdout)?;
    let rewritten = &value["Rewritten"];
    assert_eq!(rewritten["view"], "m");
    assert_eq!(rewritten["trace"]["chosen"], "m");
    assert!(rewritten["trace"]["views"]["m"].is_object());
    Ok(())
}

#[test]
fn test_explain_disabled() -> Result<()> {
    let file = scenario_file(json!([]))?;
    let path = file.path().to_string_lossy().to_string();
    let (ok, stdout, _) = run_mvx(&["explain", "--scenario", &path, "--disable"])?;
    assert!(ok);
    assert!(stdout.starts_with("Unchanged"));
    assert!(stdout.contains("no materialized views considered"));
    Ok(())
}

#[test]
fn test_canonicalize_command() -> Result<()> {
    let file = scenario_file(json!([]))?;
    let path = file.path().to_string_lossy().to_string();
    let (ok, stdout, stderr) = run_mvx(&["canonicalize", "--scenario", &path])?;
    assert!(ok, "mvx failed: {}", stderr);
    assert!(stdout.contains("equivalence classes"));
    Ok(())
}

#[test]
fn test_missing_scenario_fails() -> Result<()> {
    let (ok, _, stderr) = run_mvx(&["explain", "--scenario", "/nonexistent/scenario.json"])?;
    assert!(!ok);
    assert!(stderr.contains("Failed to read"));
    Ok(())
}
