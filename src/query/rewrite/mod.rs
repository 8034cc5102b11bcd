// Materialized View Rewrite
//
// This module contains the rewrite pipeline: canonicalize the query, then for
// every view in the catalog snapshot run structural matching, aggregate
// compatibility, and freshness checks, rank the survivors by cost and
// substitute the cheapest. Any stage can reject a view; a query with no
// surviving view is returned unchanged.

pub mod aggregate;
pub mod canonicalize;
pub mod equivalence;
pub mod freshness;
pub mod matcher;
pub mod ranker;
pub mod rewriter;
pub mod trace;

use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::catalog::snapshot::MvCatalogSnapshot;
use crate::catalog::versions::PartitionVersionOracle;
use crate::catalog::view::MaterializedView;
use crate::common::{PartitionId, RewriteError, Version};
use crate::query::planner::cost_model::Statistics;
use crate::query::planner::logical::OperatorNode;

use self::aggregate::derive_aggregate;
use self::canonicalize::canonicalize_plan;
use self::freshness::{check_freshness, Freshness};
use self::matcher::find_match;
use self::ranker::{rank, RewriteCandidate};
use self::rewriter::{derive_select, substitute, CompensationPlan};
use self::trace::{RewriteTrace, StageVerdict, ViewTrace};

/// Query-time rewrite settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// When false the pipeline is skipped entirely
    pub enabled: bool,
    /// Largest accepted lag between captured and current partition versions;
    /// `None` means any lag makes a view stale
    pub staleness_tolerance_versions: Option<u64>,
    /// Maximum number of views considered per query, in name order
    pub candidate_limit: Option<usize>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        RewriteConfig {
            enabled: true,
            staleness_tolerance_versions: None,
            candidate_limit: None,
        }
    }
}

/// Why a view did not serve a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RejectionReason {
    /// The view came after the configured candidate limit
    CandidateLimit,
    NoStructuralMatch { detail: String },
    /// First query aggregate with no derivation from the view's aggregates
    IncompatibleAggregate { function: String },
    GroupingNotDerivable { key: String },
    UnexpressibleCompensation { predicate: String },
    UnexpressibleOutput { column: String },
    Stale {
        partition: PartitionId,
        captured: Option<Version>,
        current: Version,
    },
    LostOnCost {
        winner: String,
        cost: f64,
        winner_cost: f64,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::CandidateLimit => write!(f, "candidate limit reached"),
            RejectionReason::NoStructuralMatch { detail } => write!(f, "no structural match: {}", detail),
            RejectionReason::IncompatibleAggregate { function } => {
                write!(f, "aggregate {} cannot be derived from the view", function)
            }
            RejectionReason::GroupingNotDerivable { key } => {
                write!(f, "group key {} cannot be derived from the view's grouping", key)
            }
            RejectionReason::UnexpressibleCompensation { predicate } => {
                write!(f, "predicate {} cannot be expressed over view columns", predicate)
            }
            RejectionReason::UnexpressibleOutput { column } => {
                write!(f, "output {} cannot be expressed over view columns", column)
            }
            RejectionReason::Stale {
                partition,
                captured: Some(captured),
                current,
            } => write!(
                f,
                "partition {} is stale: captured version {}, current {} ({} behind)",
                partition,
                captured,
                current,
                current.saturating_sub(*captured)
            ),
            RejectionReason::Stale {
                partition,
                captured: None,
                current,
            } => write!(f, "partition {} (version {}) is not covered by the view", partition, current),
            RejectionReason::LostOnCost { winner, cost, winner_cost } => {
                write!(f, "cost {:.1} lost to {} at {:.1}", cost, winner, winner_cost)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub view: String,
    pub reason: RejectionReason,
}

impl Rejection {
    pub fn new(view: impl Into<String>, reason: RejectionReason) -> Self {
        Rejection {
            view: view.into(),
            reason,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.view, self.reason)
    }
}

/// Outcome of one rewrite call. Rejections are kept on success too, in the
/// order the views were considered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RewriteResult {
    Rewritten {
        plan: OperatorNode,
        view: String,
        compensation: CompensationPlan,
        rejections: Vec<Rejection>,
        trace: RewriteTrace,
    },
    Unchanged {
        plan: OperatorNode,
        rejections: Vec<Rejection>,
        trace: RewriteTrace,
    },
}

impl RewriteResult {
    pub fn plan(&self) -> &OperatorNode {
        match self {
            RewriteResult::Rewritten { plan, .. } | RewriteResult::Unchanged { plan, .. } => plan,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, RewriteResult::Rewritten { .. })
    }

    /// Name of the view the plan now reads, if any
    pub fn chosen_view(&self) -> Option<&str> {
        match self {
            RewriteResult::Rewritten { view, .. } => Some(view),
            RewriteResult::Unchanged { .. } => None,
        }
    }

    pub fn rejections(&self) -> &[Rejection] {
        match self {
            RewriteResult::Rewritten { rejections, .. } | RewriteResult::Unchanged { rejections, .. } => rejections,
        }
    }

    /// Rejection recorded for `view`, if it was rejected
    pub fn rejection_for(&self, view: &str) -> Option<&RejectionReason> {
        self.rejections().iter().find(|r| r.view == view).map(|r| &r.reason)
    }

    pub fn trace(&self) -> &RewriteTrace {
        match self {
            RewriteResult::Rewritten { trace, .. } | RewriteResult::Unchanged { trace, .. } => trace,
        }
    }
}

/// Runs the rewrite pipeline against one catalog snapshot.
///
/// Statistics and partition versions come from the calling compiler and are
/// treated as cheap, already cached reads.
pub struct MvRewriter<'a> {
    snapshot: &'a MvCatalogSnapshot,
    config: RewriteConfig,
    stats: &'a dyn Statistics,
    oracle: &'a dyn PartitionVersionOracle,
}

impl<'a> MvRewriter<'a> {
    pub fn new(
        snapshot: &'a MvCatalogSnapshot,
        config: RewriteConfig,
        stats: &'a dyn Statistics,
        oracle: &'a dyn PartitionVersionOracle,
    ) -> Self {
        MvRewriter {
            snapshot,
            config,
            stats,
            oracle,
        }
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Rewrites `plan` to read the cheapest fresh view that can answer it.
    ///
    /// Errors only on catalog inconsistencies; every ordinary reason for not
    /// rewriting is a rejection in the returned result.
    pub fn rewrite(&self, plan: &OperatorNode) -> Result<RewriteResult, RewriteError> {
        let mut trace = RewriteTrace::new();
        if !self.config.enabled {
            debug!("Materialized view rewrite disabled");
            return Ok(RewriteResult::Unchanged {
                plan: plan.clone(),
                rejections: Vec::new(),
                trace,
            });
        }

        let query = canonicalize_plan(plan);
        let mut rejections = Vec::new();
        let mut candidates = Vec::new();

        for (index, view) in self.snapshot.views().enumerate() {
            let entry = trace.view_mut(view.name());
            if self.config.candidate_limit.is_some_and(|limit| index >= limit) {
                let reason = RejectionReason::CandidateLimit;
                entry.structural = StageVerdict::Rejected(reason.to_string());
                rejections.push(Rejection::new(view.name(), reason));
                continue;
            }
            match self.consider(view, &query, entry)? {
                Ok(candidate) => {
                    debug!("View {} is a candidate at cost {:.1}", view.name(), candidate.cost);
                    candidates.push(candidate);
                }
                Err(reason) => {
                    debug!("View {} rejected: {}", view.name(), reason);
                    rejections.push(Rejection::new(view.name(), reason));
                }
            }
        }

        let mut ranked = rank(candidates).into_iter();
        let Some(winner) = ranked.next() else {
            debug!("No materialized view can serve the query");
            return Ok(RewriteResult::Unchanged {
                plan: plan.clone(),
                rejections,
                trace,
            });
        };

        for loser in ranked {
            let reason = RejectionReason::LostOnCost {
                winner: winner.view_name().to_string(),
                cost: loser.cost,
                winner_cost: winner.cost,
            };
            debug!("View {} rejected: {}", loser.view_name(), reason);
            rejections.push(Rejection::new(loser.view_name(), reason));
        }
        // views are considered in name order
        rejections.sort_by(|a, b| a.view.cmp(&b.view));

        trace.set_chosen(winner.view_name());
        info!(
            "Rewrote query with materialized view {} at cost {:.1}",
            winner.view_name(),
            winner.cost
        );
        let RewriteCandidate {
            view,
            path,
            compensation,
            replacement,
            ..
        } = winner;
        Ok(RewriteResult::Rewritten {
            plan: substitute(&query, &path, replacement),
            view: view.name().to_string(),
            compensation,
            rejections,
            trace,
        })
    }

    /// Runs one view through matching, compatibility and freshness
    fn consider(
        &self,
        view: &Arc<MaterializedView>,
        query: &OperatorNode,
        entry: &mut ViewTrace,
    ) -> Result<Result<RewriteCandidate, RejectionReason>, RewriteError> {
        let matched = match find_match(view, query) {
            Ok(matched) => matched,
            Err(detail) => {
                let reason = RejectionReason::NoStructuralMatch { detail };
                entry.structural = StageVerdict::Rejected(reason.to_string());
                return Ok(Err(reason));
            }
        };
        let Some(node) = query.node_at(&matched.path) else {
            let reason = RejectionReason::NoStructuralMatch {
                detail: "matched subtree is not part of the query".to_string(),
            };
            entry.structural = StageVerdict::Rejected(reason.to_string());
            return Ok(Err(reason));
        };
        entry.structural = StageVerdict::Passed;

        let targets = node.output_columns();
        let derived = if view.is_aggregate() {
            derive_aggregate(view, &matched, node, &targets)
        } else {
            derive_select(view, &matched, &targets)
        };
        let compensation = match derived {
            Ok(compensation) => compensation,
            Err(reason) => {
                entry.compatibility = StageVerdict::Rejected(reason.to_string());
                return Ok(Err(reason));
            }
        };
        entry.compatibility = match &compensation.rollup {
            Some(rollup) => StageVerdict::PassedWithNote(format!(
                "re-aggregated to {} group key(s)",
                rollup.group_by.len()
            )),
            None => StageVerdict::Passed,
        };

        let freshness = check_freshness(
            view,
            &node.scanned_tables(),
            self.snapshot,
            self.oracle,
            self.config.staleness_tolerance_versions,
        )?;
        entry.freshness = match &freshness {
            Freshness::Fresh => StageVerdict::Passed,
            Freshness::WithinTolerance { max_lag } => {
                StageVerdict::PassedWithNote(format!("{} version(s) behind, within tolerance", max_lag))
            }
            Freshness::Stale {
                partition,
                captured,
                current,
            } => {
                let reason = RejectionReason::Stale {
                    partition: partition.clone(),
                    captured: *captured,
                    current: *current,
                };
                entry.freshness = StageVerdict::Rejected(reason.to_string());
                return Ok(Err(reason));
            }
        };

        let candidate = RewriteCandidate::new(
            Arc::clone(view),
            matched.path,
            compensation,
            freshness,
            self.stats,
        );
        entry.cost = Some(candidate.cost);
        Ok(Ok(candidate))
    }
}

/// Rewrites `plan` against `snapshot`; see [`MvRewriter::rewrite`]
pub fn rewrite(
    plan: &OperatorNode,
    snapshot: &MvCatalogSnapshot,
    config: &RewriteConfig,
    stats: &dyn Statistics,
    oracle: &dyn PartitionVersionOracle,
) -> Result<RewriteResult, RewriteError> {
    MvRewriter::new(snapshot, config.clone(), stats, oracle).rewrite(plan)
}
