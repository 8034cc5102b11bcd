use thiserror::Error;

use super::types::PartitionId;

/// Internal-consistency faults that abort the whole query compilation.
///
/// These are never used for "this view cannot serve the query"; those outcomes
/// are rejection reasons carried in the rewrite result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("Partition {partition} of table {table} is missing from the base catalog")]
    MissingPartition { table: String, partition: PartitionId },
    #[error("Table not found in catalog snapshot: {0}")]
    UnknownTable(String),
    #[error("View {view} captured partition {partition} outside its base tables")]
    CorruptCapture { view: String, partition: PartitionId },
}

/// Errors raised while mutating the view catalog
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),
    #[error("Table not found: {0}")]
    TableNotFound(String),
    #[error("Partition already exists: {0}")]
    PartitionAlreadyExists(PartitionId),
    #[error("Materialized view already exists: {0}")]
    ViewAlreadyExists(String),
    #[error("Materialized view not found: {0}")]
    ViewNotFound(String),
    #[error("Materialized view {view} has duplicate output column {column}")]
    DuplicateOutputColumn { view: String, column: String },
    #[error("Materialized view {0} does not read any base table")]
    NoBaseTables(String),
    #[error("Version oracle has no entry for partition {0}")]
    UnknownPartitionVersion(PartitionId),
}
