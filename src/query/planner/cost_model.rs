// Cost Model for Rewrite Ranking
//
// This module provides the row-count estimates the rewrite ranker compares
// candidates with. Real statistics live outside this crate; the heuristic
// model here applies fixed reduction factors per operator.

use std::collections::HashMap;

use crate::query::planner::logical::{JoinKind, OperatorNode};

/// Row-count source consulted when ranking rewrite candidates
pub trait Statistics {
    /// Estimated number of rows the node produces
    fn estimate_row_count(&self, node: &OperatorNode) -> f64;
}

/// Table sizes plus fixed selectivity factors
#[derive(Debug, Clone)]
pub struct HeuristicStatistics {
    table_rows: HashMap<String, f64>,
    default_rows: f64,
}

impl HeuristicStatistics {
    /// Assumed selectivity of a filter
    pub const FILTER_SELECTIVITY: f64 = 0.5;
    /// Assumed ratio of groups to input rows
    pub const GROUP_REDUCTION: f64 = 0.1;
    /// Assumed selectivity of a join condition
    pub const JOIN_SELECTIVITY: f64 = 0.1;

    pub fn new() -> Self {
        HeuristicStatistics {
            table_rows: HashMap::new(),
            default_rows: 1000.0,
        }
    }

    /// Records the row count of a table or materialized view
    pub fn with_table(mut self, name: impl Into<String>, rows: f64) -> Self {
        self.table_rows.insert(name.into(), rows);
        self
    }

    pub fn set_table_rows(&mut self, name: impl Into<String>, rows: f64) {
        self.table_rows.insert(name.into(), rows);
    }

    /// Row count assumed for relations without an entry
    pub fn with_default_rows(mut self, rows: f64) -> Self {
        self.default_rows = rows;
        self
    }
}

impl Default for HeuristicStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics for HeuristicStatistics {
    fn estimate_row_count(&self, node: &OperatorNode) -> f64 {
        match node {
            OperatorNode::Scan { table, .. } => {
                self.table_rows.get(table).copied().unwrap_or(self.default_rows)
            }

            OperatorNode::Filter { input, .. } => {
                self.estimate_row_count(input) * Self::FILTER_SELECTIVITY
            }

            OperatorNode::Project { input, .. } => self.estimate_row_count(input),

            OperatorNode::Aggregate { group_by, input, .. } => {
                // A global aggregate always yields exactly one row
                if group_by.is_empty() {
                    1.0
                } else {
                    (self.estimate_row_count(input) * Self::GROUP_REDUCTION).max(1.0)
                }
            }

            OperatorNode::Join { left, right, kind, .. } => {
                let l = self.estimate_row_count(left);
                let r = self.estimate_row_count(right);
                let matched = l * r * Self::JOIN_SELECTIVITY;
                match kind {
                    JoinKind::Inner => matched,
                    JoinKind::Left => matched.max(l),
                    JoinKind::Right => matched.max(r),
                    JoinKind::Full => matched.max(l + r),
                }
            }
        }
    }
}
