//! Catalog Management Module
//!
//! This module manages the metadata the rewrite pipeline reads: base tables
//! and their partitions, registered materialized views with their captured
//! partition versions, and the snapshot publisher that hands out immutable
//! catalog versions to concurrent compilations.

pub mod column;
pub mod table;
pub mod view;
pub mod versions;
pub mod snapshot;
#[allow(clippy::module_inception)]
pub mod catalog;

// Re-export key types
pub use self::catalog::MvCatalog;
pub use self::column::{Column, DataType};
pub use self::snapshot::MvCatalogSnapshot;
pub use self::table::BaseTable;
pub use self::versions::{InMemoryVersions, PartitionVersionOracle};
pub use self::view::MaterializedView;
