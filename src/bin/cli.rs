use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Deserialize;

use mvrewrite::catalog::{BaseTable, Column, InMemoryVersions, MvCatalog};
use mvrewrite::common::{PartitionId, Version};
use mvrewrite::query::planner::{HeuristicStatistics, OperatorNode};
use mvrewrite::query::rewrite::canonicalize::canonicalize;
use mvrewrite::query::{rewrite, RewriteConfig, RewriteResult};

#[derive(Parser)]
#[command(author, version, about = "mvx - explain materialized view rewrites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rewrite pipeline on a scenario and explain every view's verdict
    Explain {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Skip the rewrite pipeline
        #[arg(long)]
        disable: bool,

        /// Accept views lagging by at most this many partition versions
        #[arg(long)]
        tolerance: Option<u64>,

        /// Consider at most this many views
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the canonical form of the scenario's query
    Canonicalize {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// A catalog, its partition versions, and one query
#[derive(Deserialize)]
struct Scenario {
    tables: Vec<ScenarioTable>,
    #[serde(default)]
    views: Vec<ScenarioView>,
    query: OperatorNode,
    #[serde(default)]
    config: RewriteConfig,
    /// Row counts of tables and views for cost estimation
    #[serde(default)]
    row_counts: BTreeMap<String, f64>,
    /// Changes applied after the views were registered
    #[serde(default)]
    updates: Vec<Update>,
}

#[derive(Deserialize)]
struct ScenarioTable {
    name: String,
    #[serde(default)]
    columns: Vec<Column>,
    partitions: Vec<ScenarioPartition>,
}

#[derive(Deserialize)]
struct ScenarioPartition {
    name: String,
    #[serde(default = "initial_version")]
    version: Version,
}

fn initial_version() -> Version {
    1
}

#[derive(Deserialize)]
struct ScenarioView {
    name: String,
    plan: OperatorNode,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum Update {
    /// A committed write to an existing partition
    Write { table: String, partition: String },
    /// A new partition with its first version
    AddPartition {
        table: String,
        partition: String,
        #[serde(default = "initial_version")]
        version: Version,
    },
    Refresh { view: String },
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid scenario {}", path.display()))
}

/// Builds the catalog and version oracle a scenario describes
fn build_catalog(scenario: &Scenario) -> Result<(MvCatalog, InMemoryVersions)> {
    let catalog = MvCatalog::new();
    let versions = InMemoryVersions::new();

    for table in &scenario.tables {
        let names: Vec<&str> = table.partitions.iter().map(|p| p.name.as_str()).collect();
        catalog.register_table(BaseTable::new(table.name.clone(), table.columns.clone()).with_partitions(&names))?;
        for partition in &table.partitions {
            versions.set(PartitionId::new(&table.name, &partition.name), partition.version);
        }
    }

    for view in &scenario.views {
        catalog
            .register_view(&view.name, view.plan.clone(), &versions)
            .with_context(|| format!("Failed to register view {}", view.name))?;
    }

    for update in &scenario.updates {
        match update {
            Update::Write { table, partition } => {
                let version = versions.bump(&PartitionId::new(table, partition));
                info!("Partition {}.{} now at version {}", table, partition, version);
            }
            Update::AddPartition {
                table,
                partition,
                version,
            } => {
                let id = catalog.add_partition(table, partition)?;
                versions.set(id, *version);
            }
            Update::Refresh { view } => {
                catalog.refresh_view(view, &versions)?;
            }
        }
    }

    Ok((catalog, versions))
}

fn explain(
    scenario: Scenario,
    disable: bool,
    tolerance: Option<u64>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let (catalog, versions) = build_catalog(&scenario)?;

    let mut config = scenario.config.clone();
    if disable {
        config.enabled = false;
    }
    if tolerance.is_some() {
        config.staleness_tolerance_versions = tolerance;
    }
    if limit.is_some() {
        config.candidate_limit = limit;
    }

    let mut stats = HeuristicStatistics::new();
    for (name, rows) in &scenario.row_counts {
        stats.set_table_rows(name.clone(), *rows);
    }

    let snapshot = catalog.snapshot();
    let result = rewrite(&scenario.query, &snapshot, &config, &stats, &versions)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => display_result(&result),
    }
    Ok(())
}

fn display_result(result: &RewriteResult) {
    match result.chosen_view() {
        Some(view) => println!("Rewritten using {}", view),
        None => println!("Unchanged"),
    }
    println!();
    print!("{}", result.trace());
    if !result.rejections().is_empty() {
        println!();
        println!("Rejections:");
        for rejection in result.rejections() {
            println!("  {}", rejection);
        }
    }
    println!();
    println!("Plan:");
    print!("{}", result.plan());
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Explain {
            scenario,
            disable,
            tolerance,
            limit,
            format,
        } => explain(load_scenario(&scenario)?, disable, tolerance, limit, format),
        Commands::Canonicalize { scenario } => {
            let scenario = load_scenario(&scenario)?;
            let canonical = canonicalize(&scenario.query);
            print!("{}", canonical.root);
            println!("({} equivalence classes)", canonical.class_count());
            Ok(())
        }
    }
}
