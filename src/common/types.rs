use std::fmt;

use serde::{Deserialize, Serialize};

/// Partition version counter, bumped on every committed mutation
pub type Version = u64;

/// Equivalence class id, valid only within one canonicalization pass
pub type ClassId = u32;

/// Identity of a partition owned by a base table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub table: String,
    pub name: String,
}

impl PartitionId {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}
