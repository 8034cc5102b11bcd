// Candidate Cost Ranker
//
// Compares the candidates that survived every check. A candidate's cost is
// the sum of the estimated row counts of its view scan and of each
// compensation operator above it. This is a direct comparison, not a search.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::catalog::view::MaterializedView;
use crate::query::planner::cost_model::Statistics;
use crate::query::planner::logical::{NodePath, OperatorNode};
use crate::query::rewrite::freshness::Freshness;
use crate::query::rewrite::rewriter::CompensationPlan;

/// A view that can replace a query subtree
#[derive(Debug, Clone)]
pub struct RewriteCandidate {
    pub view: Arc<MaterializedView>,
    pub path: NodePath,
    pub compensation: CompensationPlan,
    pub replacement: OperatorNode,
    pub cost: f64,
    pub freshness: Freshness,
}

impl RewriteCandidate {
    pub fn new(
        view: Arc<MaterializedView>,
        path: NodePath,
        compensation: CompensationPlan,
        freshness: Freshness,
        stats: &dyn Statistics,
    ) -> Self {
        let replacement = compensation.apply(&view);
        let cost = estimate_cost(&replacement, stats);
        RewriteCandidate {
            view,
            path,
            compensation,
            replacement,
            cost,
            freshness,
        }
    }

    pub fn view_name(&self) -> &str {
        self.view.name()
    }
}

/// Rows produced by every node of a replacement chain, summed
pub fn estimate_cost(replacement: &OperatorNode, stats: &dyn Statistics) -> f64 {
    let mut cost = stats.estimate_row_count(replacement);
    let mut node = replacement;
    while let Some(child) = node.children().first().copied() {
        cost += stats.estimate_row_count(child);
        node = child;
    }
    cost
}

fn compare(a: &RewriteCandidate, b: &RewriteCandidate) -> Ordering {
    a.cost
        .total_cmp(&b.cost)
        .then_with(|| a.compensation.operator_count().cmp(&b.compensation.operator_count()))
        .then_with(|| a.view_name().cmp(b.view_name()))
}

/// Orders candidates cheapest first; ties go to fewer compensation
/// operators, then to the smaller view name
pub fn rank(mut candidates: Vec<RewriteCandidate>) -> Vec<RewriteCandidate> {
    candidates.sort_by(compare);
    candidates
}
