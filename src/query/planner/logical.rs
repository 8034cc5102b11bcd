// Logical Operator Tree
//
// This module defines the operator tree shared by incoming queries and
// materialized view definitions. Operators form a closed set and own their
// children exclusively, so a plan is always a tree.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::planner::expression::{ColumnRef, Expression};

/// Join kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub fn is_inner(&self) -> bool {
        matches!(self, JoinKind::Inner)
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
        };
        write!(f, "{}", s)
    }
}

/// One aggregate output of an Aggregate node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateCall {
    pub func: AggregateFunction,
    /// `None` only for COUNT(*)
    pub arg: Option<Expression>,
    #[serde(default)]
    pub distinct: bool,
    pub alias: String,
}

impl AggregateCall {
    pub fn new(func: AggregateFunction, arg: Option<Expression>, alias: impl Into<String>) -> Self {
        AggregateCall {
            func,
            arg,
            distinct: false,
            alias: alias.into(),
        }
    }

    pub fn output_column(&self) -> ColumnRef {
        ColumnRef::bare(self.alias.clone())
    }

    /// The call without its alias, e.g. `COUNT(DISTINCT t.x)`
    pub fn signature(&self) -> String {
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        match &self.arg {
            Some(arg) => format!("{}({}{})", self.func, distinct, arg),
            None => format!("{}({}*)", self.func, distinct),
        }
    }
}

/// One output of a Project node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectItem {
    pub expr: Expression,
    pub output: ColumnRef,
}

impl ProjectItem {
    /// Pass a column through under its own name
    pub fn column(column: ColumnRef) -> Self {
        ProjectItem {
            expr: Expression::Column(column.clone()),
            output: column,
        }
    }

    pub fn aliased(expr: Expression, name: impl Into<String>) -> Self {
        ProjectItem {
            expr,
            output: ColumnRef::bare(name),
        }
    }
}

/// Output column of a group key: the column itself, or the key's text
pub fn group_key_output(key: &Expression) -> ColumnRef {
    match key {
        Expression::Column(c) => c.clone(),
        other => ColumnRef::bare(other.to_string()),
    }
}

/// Address of a node: child indices from the root
pub type NodePath = Vec<usize>;

/// Represents a node in the operator tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorNode {
    /// Scan a base table (or a materialized view's storage)
    Scan {
        /// Table name
        table: String,
        /// Table alias (if any)
        alias: Option<String>,
        /// Columns read, in output order
        columns: Vec<String>,
    },
    /// Filter rows based on a predicate
    Filter {
        predicate: Expression,
        input: Box<OperatorNode>,
    },
    /// Compute output expressions
    Project {
        items: Vec<ProjectItem>,
        input: Box<OperatorNode>,
    },
    /// Group rows and compute aggregates
    Aggregate {
        group_by: Vec<Expression>,
        aggregates: Vec<AggregateCall>,
        input: Box<OperatorNode>,
    },
    /// Join two relations
    Join {
        left: Box<OperatorNode>,
        right: Box<OperatorNode>,
        condition: Expression,
        kind: JoinKind,
        /// Set when the children are stored swapped relative to the output
        /// column order the parent expects
        #[serde(default)]
        commuted: bool,
    },
}

impl OperatorNode {
    /// Short name of the operator variant
    pub fn kind_name(&self) -> &'static str {
        match self {
            OperatorNode::Scan { .. } => "Scan",
            OperatorNode::Filter { .. } => "Filter",
            OperatorNode::Project { .. } => "Project",
            OperatorNode::Aggregate { .. } => "Aggregate",
            OperatorNode::Join { .. } => "Join",
        }
    }

    /// Column qualifier a Scan gives its output
    pub fn scan_qualifier(&self) -> Option<&str> {
        match self {
            OperatorNode::Scan { table, alias, .. } => Some(alias.as_deref().unwrap_or(table)),
            _ => None,
        }
    }

    /// Output columns, in order
    pub fn output_columns(&self) -> Vec<ColumnRef> {
        match self {
            OperatorNode::Scan { columns, .. } => {
                let qualifier = self.scan_qualifier().unwrap_or_default();
                columns.iter().map(|c| ColumnRef::new(qualifier, c.clone())).collect()
            }
            OperatorNode::Filter { input, .. } => input.output_columns(),
            OperatorNode::Project { items, .. } => items.iter().map(|i| i.output.clone()).collect(),
            OperatorNode::Aggregate { group_by, aggregates, .. } => group_by
                .iter()
                .map(group_key_output)
                .chain(aggregates.iter().map(|a| a.output_column()))
                .collect(),
            OperatorNode::Join { left, right, commuted, .. } => {
                let (first, second) = if *commuted { (right, left) } else { (left, right) };
                let mut cols = first.output_columns();
                cols.extend(second.output_columns());
                cols
            }
        }
    }

    pub fn children(&self) -> Vec<&OperatorNode> {
        match self {
            OperatorNode::Scan { .. } => vec![],
            OperatorNode::Filter { input, .. }
            | OperatorNode::Project { input, .. }
            | OperatorNode::Aggregate { input, .. } => vec![input.as_ref()],
            OperatorNode::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }

    pub fn contains_aggregate(&self) -> bool {
        matches!(self, OperatorNode::Aggregate { .. })
            || self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Names of all base tables scanned in this subtree
    pub fn scanned_tables(&self) -> BTreeSet<String> {
        let mut tables = BTreeSet::new();
        self.collect_tables(&mut tables);
        tables
    }

    fn collect_tables(&self, tables: &mut BTreeSet<String>) {
        if let OperatorNode::Scan { table, .. } = self {
            tables.insert(table.clone());
        }
        for child in self.children() {
            child.collect_tables(tables);
        }
    }

    /// All nodes in preorder, paired with their paths
    pub fn preorder(&self) -> Vec<(NodePath, &OperatorNode)> {
        let mut out = Vec::new();
        self.preorder_into(Vec::new(), &mut out);
        out
    }

    fn preorder_into<'a>(&'a self, path: NodePath, out: &mut Vec<(NodePath, &'a OperatorNode)>) {
        let children = self.children();
        out.push((path.clone(), self));
        for (i, child) in children.into_iter().enumerate() {
            let mut child_path = path.clone();
            child_path.push(i);
            child.preorder_into(child_path, out);
        }
    }

    pub fn node_at(&self, path: &[usize]) -> Option<&OperatorNode> {
        match path.split_first() {
            None => Some(self),
            Some((&i, rest)) => self.children().get(i).and_then(|c| c.node_at(rest)),
        }
    }

    /// Returns a new tree with the node at `path` replaced; `self` is untouched.
    /// Each node is copied once, so the cost is linear in the tree size.
    pub fn replace_at(&self, path: &[usize], replacement: OperatorNode) -> OperatorNode {
        let Some((&i, rest)) = path.split_first() else {
            return replacement;
        };
        let mut replacement = Some(replacement);
        let mut child = |node: &OperatorNode, index: usize| -> Box<OperatorNode> {
            match replacement.take() {
                Some(r) if index == i => Box::new(node.replace_at(rest, r)),
                other => {
                    replacement = other;
                    Box::new(node.clone())
                }
            }
        };
        match self {
            OperatorNode::Scan { .. } => self.clone(),
            OperatorNode::Filter { predicate, input } => OperatorNode::Filter {
                predicate: predicate.clone(),
                input: child(input, 0),
            },
            OperatorNode::Project { items, input } => OperatorNode::Project {
                items: items.clone(),
                input: child(input, 0),
            },
            OperatorNode::Aggregate {
                group_by,
                aggregates,
                input,
            } => OperatorNode::Aggregate {
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
                input: child(input, 0),
            },
            OperatorNode::Join {
                left,
                right,
                condition,
                kind,
                commuted,
            } => OperatorNode::Join {
                left: child(left, 0),
                right: child(right, 1),
                condition: condition.clone(),
                kind: *kind,
                commuted: *commuted,
            },
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            OperatorNode::Scan { table, alias, columns } => {
                write!(f, "{}Scan: {}", pad, table)?;
                if let Some(a) = alias {
                    write!(f, " as {}", a)?;
                }
                writeln!(f, " [{}]", columns.join(", "))?;
            }
            OperatorNode::Filter { predicate, .. } => {
                writeln!(f, "{}Filter: {}", pad, predicate)?;
            }
            OperatorNode::Project { items, .. } => {
                let items: Vec<String> = items
                    .iter()
                    .map(|i| match &i.expr {
                        Expression::Column(c) if *c == i.output => c.to_string(),
                        e => format!("{} AS {}", e, i.output),
                    })
                    .collect();
                writeln!(f, "{}Project: {}", pad, items.join(", "))?;
            }
            OperatorNode::Aggregate { group_by, aggregates, .. } => {
                let keys: Vec<String> = group_by.iter().map(|k| k.to_string()).collect();
                let aggs: Vec<String> = aggregates
                    .iter()
                    .map(|a| format!("{} AS {}", a.signature(), a.alias))
                    .collect();
                writeln!(f, "{}Aggregate: group=[{}] aggs=[{}]", pad, keys.join(", "), aggs.join(", "))?;
            }
            OperatorNode::Join { condition, kind, commuted, .. } => {
                write!(f, "{}{:?} Join: {}", pad, kind, condition)?;
                if *commuted {
                    write!(f, " (commuted)")?;
                }
                writeln!(f)?;
            }
        }
        for child in self.children() {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
