//! Table Management Module
//!
//! This module defines the base tables a materialized view can read, and the
//! partitions each table owns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::column::Column;
use crate::common::PartitionId;

/// Represents a partitioned base table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseTable {
    /// Table name
    name: String,
    /// Columns in the table
    columns: Vec<Column>,
    /// Partitions owned by the table, in creation order
    #[serde(default)]
    partitions: Vec<PartitionId>,
    /// Column name to index lookup
    #[serde(skip)]
    column_map: HashMap<String, usize>,
}

impl BaseTable {
    /// Create a new table with the given name and columns and no partitions
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let column_map = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_string(), i))
            .collect();
        BaseTable {
            name: name.into(),
            columns,
            partitions: Vec::new(),
            column_map,
        }
    }

    /// Add partitions by name
    pub fn with_partitions(mut self, names: &[&str]) -> Self {
        for name in names {
            let id = PartitionId::new(self.name.clone(), *name);
            if !self.partitions.contains(&id) {
                self.partitions.push(id);
            }
        }
        self
    }

    /// Get the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        match self.column_map.get(name) {
            Some(&i) => self.columns.get(i),
            // the lookup map is not serialized
            None => self.columns.iter().find(|c| c.name() == name),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    pub fn has_partition(&self, partition: &PartitionId) -> bool {
        self.partitions.contains(partition)
    }

    /// Append a partition; returns false if it already exists
    pub(crate) fn add_partition(&mut self, partition: PartitionId) -> bool {
        if self.has_partition(&partition) {
            return false;
        }
        self.partitions.push(partition);
        true
    }
}
