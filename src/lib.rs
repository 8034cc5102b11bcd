// Materialized View Query Rewrite

pub mod common;
pub mod catalog;
pub mod query;

// Re-export key items for convenient access
pub use catalog::{MvCatalog, MvCatalogSnapshot, InMemoryVersions, PartitionVersionOracle};
pub use common::{CatalogError, RewriteError};
pub use query::planner::{HeuristicStatistics, OperatorNode, PlanBuilder, Statistics};
pub use query::{rewrite, MvRewriter, RewriteConfig, RewriteResult};
pub use query::rewrite::{Rejection, RejectionReason};
