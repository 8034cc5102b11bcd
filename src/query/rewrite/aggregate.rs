// Aggregate Compatibility Checker
//
// Decides whether a query aggregation can be answered from an aggregate
// view and builds the compensation that does it. The query's grouping must
// be derivable from the view's group keys; when the view groups more finely
// its rows are re-aggregated. Every query aggregate must have a derivation
// from the view's aggregates.

use crate::catalog::view::MaterializedView;
use crate::query::planner::builder::func;
use crate::query::planner::expression::{conjoin, BinaryOperator, ColumnRef, Expression, ScalarValue};
use crate::query::planner::logical::{group_key_output, AggregateCall, AggregateFunction, OperatorNode, ProjectItem};
use crate::query::rewrite::equivalence::EquivalenceClasses;
use crate::query::rewrite::matcher::{express_over, StructuralMatch};
use crate::query::rewrite::rewriter::{CompensationPlan, Rollup};
use crate::query::rewrite::RejectionReason;

/// Re-aggregation calls, deduplicated by function and input column
#[derive(Debug, Default)]
struct RollupCalls {
    calls: Vec<AggregateCall>,
}

impl RollupCalls {
    fn add(&mut self, func: AggregateFunction, arg: Expression) -> Expression {
        if let Some(existing) = self.calls.iter().find(|c| c.func == func && c.arg.as_ref() == Some(&arg)) {
            return Expression::Column(existing.output_column());
        }
        let call = AggregateCall::new(func, Some(arg), format!("_rollup{}", self.calls.len()));
        let out = Expression::Column(call.output_column());
        self.calls.push(call);
        out
    }
}

struct ViewAggregates<'a> {
    view: &'a MaterializedView,
    calls: &'a [AggregateCall],
    /// View aggregate arguments in the query namespace
    args: &'a [Expression],
    key_count: usize,
    classes: &'a EquivalenceClasses,
}

impl ViewAggregates<'_> {
    /// Stored column of a view aggregate with this function and argument
    fn find(&self, func: AggregateFunction, distinct: bool, arg: Option<&Expression>) -> Option<ColumnRef> {
        let wanted = arg.map(|a| self.classes.normalize(a));
        self.calls.iter().enumerate().find_map(|(i, call)| {
            let view_arg = call.arg.as_ref().map(|_| self.classes.normalize(&self.args[i]));
            if call.func == func && call.distinct == distinct && view_arg == wanted {
                self.view.scan_column(self.key_count + i)
            } else {
                None
            }
        })
    }
}

fn incompatible(call: &AggregateCall) -> RejectionReason {
    RejectionReason::IncompatibleAggregate {
        function: call.signature(),
    }
}

/// Derives the compensation answering `query` (a canonical Aggregate) from `view`.
///
/// `targets` are the column names the query node's parent expects.
pub fn derive_aggregate(
    view: &MaterializedView,
    matched: &StructuralMatch,
    query: &OperatorNode,
    targets: &[ColumnRef],
) -> Result<CompensationPlan, RejectionReason> {
    let (OperatorNode::Aggregate { group_by, aggregates, .. }, Some(view_calls)) = (query, view.aggregates())
    else {
        return Err(RejectionReason::NoStructuralMatch {
            detail: "aggregate view paired with a non-aggregate subtree".to_string(),
        });
    };

    let key_count = view.group_keys().map_or(0, |k| k.len());
    let (view_keys, view_args) = matched.view_outputs.split_at(key_count);
    let (query_keys, _) = matched.query_outputs.split_at(group_by.len());
    let query_args: Vec<Option<Expression>> = aggregates
        .iter()
        .enumerate()
        .map(|(i, call)| call.arg.as_ref().map(|_| matched.query_outputs[group_by.len() + i].clone()))
        .collect();

    let key_columns: Vec<(Expression, ColumnRef)> = view_keys
        .iter()
        .enumerate()
        .filter_map(|(i, k)| view.scan_column(i).map(|c| (k.clone(), c)))
        .collect();

    // The compensation filter runs on view rows, so only the view's own
    // predicates may be used to rewrite it.
    let view_classes = matched.view_predicates.classes();
    let mut filters = Vec::new();
    for conjunct in &matched.compensation {
        let expressed = express_over(conjunct, &key_columns, view_classes).ok_or_else(|| {
            RejectionReason::UnexpressibleCompensation {
                predicate: conjunct.to_string(),
            }
        })?;
        filters.push(expressed);
    }

    let classes = matched.query_predicates.classes();
    let mut derived_keys = Vec::with_capacity(query_keys.len());
    for key in query_keys {
        // a global view has one row even over empty input, so it cannot feed groups
        let derived = if view_keys.is_empty() {
            None
        } else {
            express_over(key, &key_columns, classes)
        };
        match derived {
            Some(d) => derived_keys.push(d),
            None => return Err(RejectionReason::GroupingNotDerivable { key: key.to_string() }),
        }
    }

    let covered = |view_key: &Expression| {
        let normalized = classes.normalize(view_key);
        query_keys.iter().any(|q| classes.normalize(q) == normalized)
            || classes.constant_of(&normalized).is_some()
    };
    let rollup = (query_keys.is_empty() && !view_keys.is_empty()) || !view_keys.iter().all(covered);

    let available = ViewAggregates {
        view,
        calls: view_calls,
        args: view_args,
        key_count,
        classes,
    };
    let mut rollup_calls = RollupCalls::default();
    let mut agg_exprs = Vec::with_capacity(aggregates.len());
    for (call, arg) in aggregates.iter().zip(&query_args) {
        let derived = derive_call(
            call,
            arg.as_ref(),
            &available,
            &key_columns,
            rollup,
            group_by.is_empty(),
            &mut rollup_calls,
        )
        .ok_or_else(|| incompatible(call))?;
        agg_exprs.push(derived);
    }

    let (rollup_node, key_exprs) = if rollup {
        let mut rollup_keys: Vec<Expression> = Vec::new();
        for key in derived_keys.iter().filter(|k| !k.is_literal()) {
            if !rollup_keys.contains(key) {
                rollup_keys.push(key.clone());
            }
        }
        let key_exprs = derived_keys
            .iter()
            .map(|k| {
                if k.is_literal() {
                    k.clone()
                } else {
                    Expression::Column(group_key_output(k))
                }
            })
            .collect();
        (
            Some(Rollup {
                group_by: rollup_keys,
                aggregates: rollup_calls.calls,
            }),
            key_exprs,
        )
    } else {
        (None, derived_keys)
    };

    let project = key_exprs
        .into_iter()
        .chain(agg_exprs)
        .zip(targets)
        .map(|(expr, target)| ProjectItem {
            expr,
            output: target.clone(),
        })
        .collect();

    Ok(CompensationPlan {
        filter: conjoin(filters),
        rollup: rollup_node,
        project,
    })
}

fn derive_call(
    call: &AggregateCall,
    arg: Option<&Expression>,
    view: &ViewAggregates<'_>,
    key_columns: &[(Expression, ColumnRef)],
    rollup: bool,
    global: bool,
    rollup_calls: &mut RollupCalls,
) -> Option<Expression> {
    if call.distinct {
        // a distinct aggregate cannot be recombined across groups
        if rollup {
            return None;
        }
        return view.find(call.func, true, arg).map(Expression::Column);
    }

    match call.func {
        AggregateFunction::Sum => {
            let column = Expression::Column(view.find(AggregateFunction::Sum, false, arg)?);
            Some(if rollup {
                rollup_calls.add(AggregateFunction::Sum, column)
            } else {
                column
            })
        }
        AggregateFunction::Count => {
            let column = Expression::Column(view.find(AggregateFunction::Count, false, arg)?);
            if !rollup {
                return Some(column);
            }
            let total = rollup_calls.add(AggregateFunction::Sum, column);
            // SUM over no rows is NULL where COUNT is 0
            Some(if global {
                func("coalesce", vec![total, Expression::Literal(ScalarValue::Integer(0))])
            } else {
                total
            })
        }
        AggregateFunction::Min | AggregateFunction::Max => {
            let input = match view.find(call.func, false, arg) {
                Some(column) => Expression::Column(column),
                // an extreme of a grouping expression is the expression itself,
                // provided the group is never empty
                None if !key_columns.is_empty() => express_over(arg?, key_columns, view.classes)?,
                None => return None,
            };
            Some(if rollup {
                rollup_calls.add(call.func, input)
            } else {
                input
            })
        }
        AggregateFunction::Avg => {
            if !rollup {
                if let Some(column) = view.find(AggregateFunction::Avg, false, arg) {
                    return Some(Expression::Column(column));
                }
            }
            let sum = Expression::Column(view.find(AggregateFunction::Sum, false, arg)?);
            let count = Expression::Column(view.find(AggregateFunction::Count, false, arg)?);
            let (sum, count) = if rollup {
                (
                    rollup_calls.add(AggregateFunction::Sum, sum),
                    rollup_calls.add(AggregateFunction::Sum, count),
                )
            } else {
                (sum, count)
            };
            Some(Expression::binary(sum, BinaryOperator::Divide, count))
        }
    }
}
