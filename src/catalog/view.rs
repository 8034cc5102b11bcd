// Materialized View Definitions
//
// A materialized view stores the result of its defining plan under its own
// name. The stored relation has one column per output of the definition, in
// the same order, named after that output. `captured` records the version
// of every covered partition at the last successful refresh.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::common::{CatalogError, PartitionId, Version};
use crate::query::planner::expression::{ColumnRef, Expression};
use crate::query::planner::logical::{AggregateCall, OperatorNode};
use crate::query::rewrite::canonicalize::canonicalize_definition;

/// Represents a registered materialized view
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedView {
    name: String,
    definition: OperatorNode,
    canonical: OperatorNode,
    output_columns: Vec<String>,
    base_tables: BTreeSet<String>,
    captured: BTreeMap<PartitionId, Version>,
}

impl MaterializedView {
    /// Validates a definition; the view starts with nothing captured
    pub fn new(name: impl Into<String>, definition: OperatorNode) -> Result<Self, CatalogError> {
        let name = name.into();
        let base_tables = definition.scanned_tables();
        if base_tables.is_empty() {
            return Err(CatalogError::NoBaseTables(name));
        }

        let mut seen = HashSet::new();
        let mut output_columns = Vec::new();
        for column in definition.output_columns() {
            if !seen.insert(column.name.clone()) {
                return Err(CatalogError::DuplicateOutputColumn {
                    view: name,
                    column: column.name,
                });
            }
            output_columns.push(column.name);
        }

        Ok(MaterializedView {
            canonical: canonicalize_definition(&definition),
            name,
            definition,
            output_columns,
            base_tables,
            captured: BTreeMap::new(),
        })
    }

    /// A copy of this view carrying a new captured version map
    pub fn with_captured(&self, captured: BTreeMap<PartitionId, Version>) -> Self {
        MaterializedView {
            captured,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The plan as registered
    pub fn definition(&self) -> &OperatorNode {
        &self.definition
    }

    /// The canonical form of the definition, used for matching
    pub fn canonical(&self) -> &OperatorNode {
        &self.canonical
    }

    /// Stored column names, in definition output order
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    pub fn base_tables(&self) -> &BTreeSet<String> {
        &self.base_tables
    }

    pub fn captured(&self) -> &BTreeMap<PartitionId, Version> {
        &self.captured
    }

    pub fn captured_version(&self, partition: &PartitionId) -> Option<Version> {
        self.captured.get(partition).copied()
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.canonical, OperatorNode::Aggregate { .. })
    }

    /// Grouping keys of an aggregate view
    pub fn group_keys(&self) -> Option<&[Expression]> {
        match &self.canonical {
            OperatorNode::Aggregate { group_by, .. } => Some(group_by),
            _ => None,
        }
    }

    /// Aggregate specs of an aggregate view
    pub fn aggregates(&self) -> Option<&[AggregateCall]> {
        match &self.canonical {
            OperatorNode::Aggregate { aggregates, .. } => Some(aggregates),
            _ => None,
        }
    }

    /// The stored column holding the definition's `index`-th output
    pub fn scan_column(&self, index: usize) -> Option<ColumnRef> {
        self.output_columns
            .get(index)
            .map(|c| ColumnRef::new(self.name.clone(), c.clone()))
    }

    /// Scan of the view's stored relation
    pub fn scan_node(&self) -> OperatorNode {
        OperatorNode::Scan {
            table: self.name.clone(),
            alias: None,
            columns: self.output_columns.clone(),
        }
    }
}
