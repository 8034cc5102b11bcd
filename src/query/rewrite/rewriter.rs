// Rewriter
//
// Builds the operators that stand in for a matched subtree: a scan of the
// view, then in order an optional compensating filter, an optional
// re-aggregation and a projection restoring the columns the subtree's parent
// reads. The original tree is never modified; substitution returns a new root.

use serde::Serialize;

use crate::catalog::view::MaterializedView;
use crate::query::planner::expression::{conjoin, ColumnRef, Expression};
use crate::query::planner::logical::{AggregateCall, NodePath, OperatorNode, ProjectItem};
use crate::query::rewrite::matcher::{express_over, StructuralMatch};
use crate::query::rewrite::RejectionReason;

/// Re-grouping of view rows down to the query's grouping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollup {
    pub group_by: Vec<Expression>,
    pub aggregates: Vec<AggregateCall>,
}

/// Operators placed on top of the view scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationPlan {
    /// Predicate over view columns
    pub filter: Option<Expression>,
    pub rollup: Option<Rollup>,
    pub project: Vec<ProjectItem>,
}

impl CompensationPlan {
    /// The replacement subtree: `Scan(view)`, then filter, rollup and projection
    pub fn apply(&self, view: &MaterializedView) -> OperatorNode {
        let mut node = view.scan_node();
        if let Some(predicate) = &self.filter {
            node = OperatorNode::Filter {
                predicate: predicate.clone(),
                input: Box::new(node),
            };
        }
        if let Some(rollup) = &self.rollup {
            node = OperatorNode::Aggregate {
                group_by: rollup.group_by.clone(),
                aggregates: rollup.aggregates.clone(),
                input: Box::new(node),
            };
        }
        OperatorNode::Project {
            items: self.project.clone(),
            input: Box::new(node),
        }
    }

    /// Number of operators above the view scan
    pub fn operator_count(&self) -> usize {
        1 + usize::from(self.filter.is_some()) + usize::from(self.rollup.is_some())
    }
}

/// Derives the compensation for a view without aggregation
pub fn derive_select(
    view: &MaterializedView,
    matched: &StructuralMatch,
    targets: &[ColumnRef],
) -> Result<CompensationPlan, RejectionReason> {
    let available: Vec<(Expression, ColumnRef)> = matched
        .view_outputs
        .iter()
        .enumerate()
        .filter_map(|(i, e)| view.scan_column(i).map(|c| (e.clone(), c)))
        .collect();

    let mut filters = Vec::new();
    for conjunct in &matched.compensation {
        let expressed = express_over(conjunct, &available, matched.view_predicates.classes()).ok_or_else(|| {
            RejectionReason::UnexpressibleCompensation {
                predicate: conjunct.to_string(),
            }
        })?;
        filters.push(expressed);
    }

    let mut project = Vec::with_capacity(targets.len());
    for (output, target) in matched.query_outputs.iter().zip(targets) {
        let expr = express_over(output, &available, matched.query_predicates.classes()).ok_or_else(|| {
            RejectionReason::UnexpressibleOutput {
                column: target.to_string(),
            }
        })?;
        project.push(ProjectItem {
            expr,
            output: target.clone(),
        });
    }

    Ok(CompensationPlan {
        filter: conjoin(filters),
        rollup: None,
        project,
    })
}

/// Substitutes `replacement` for the node at `path`, returning a new tree
pub fn substitute(root: &OperatorNode, path: &NodePath, replacement: OperatorNode) -> OperatorNode {
    root.replace_at(path, replacement)
}
