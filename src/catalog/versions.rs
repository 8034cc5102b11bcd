// Partition Version Oracle
//
// Current partition versions are owned by the storage layer. The rewrite
// pipeline only reads them, through the `PartitionVersionOracle` trait.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::common::{PartitionId, Version};

/// Source of the current committed version of each partition
pub trait PartitionVersionOracle: Send + Sync {
    /// `None` if the partition is unknown
    fn current_version(&self, partition: &PartitionId) -> Option<Version>;
}

/// Thread-safe in-memory version table
#[derive(Debug, Default)]
pub struct InMemoryVersions {
    versions: RwLock<HashMap<PartitionId, Version>>,
}

impl InMemoryVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a partition's version; versions never move backwards
    pub fn set(&self, partition: PartitionId, version: Version) {
        let mut versions = self.versions.write();
        let entry = versions.entry(partition).or_insert(version);
        *entry = (*entry).max(version);
    }

    /// Records a committed mutation and returns the new version
    pub fn bump(&self, partition: &PartitionId) -> Version {
        let mut versions = self.versions.write();
        let entry = versions.entry(partition.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.read().is_empty()
    }
}

impl PartitionVersionOracle for InMemoryVersions {
    fn current_version(&self, partition: &PartitionId) -> Option<Version> {
        self.versions.read().get(partition).copied()
    }
}

impl PartitionVersionOracle for HashMap<PartitionId, Version> {
    fn current_version(&self, partition: &PartitionId) -> Option<Version> {
        self.get(partition).copied()
    }
}
