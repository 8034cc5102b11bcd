// Common definitions shared by the catalog and the rewrite pipeline.

pub mod types;
pub mod error;

pub use types::{ClassId, PartitionId, Version};
pub use error::{CatalogError, RewriteError};
