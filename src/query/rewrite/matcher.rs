// Structural Matcher
//
// Pairs a materialized view definition with a subtree of a query. Both trees
// are walked top-down together. Filters and projections may appear on either
// side: filter conjuncts become predicate obligations, projections are
// inlined into the expressions collected so far, so both sides end up
// described over base-table columns. Scans of the same table pair up and
// map the view's column qualifiers onto the query's. Inner joins contribute
// their conditions as conjuncts and may pair their inputs either way round;
// outer joins and nested aggregations must be identical up to that mapping.
//
// Once the trees are paired, every view conjunct must be implied by the
// query's predicates. Query conjuncts the view does not already guarantee
// become the compensation filter.

use std::collections::{BTreeMap, HashMap};

use log::trace;

use crate::catalog::view::MaterializedView;
use crate::query::planner::expression::{ColumnRef, Expression, ScalarValue};
use crate::query::planner::logical::{NodePath, OperatorNode, ProjectItem};
use crate::query::rewrite::canonicalize::canonicalize_expr;
use crate::query::rewrite::equivalence::{EquivalenceClasses, PredicateSet};

/// Expressions collected on one side of the match
#[derive(Debug, Clone, Default)]
struct Side {
    conjuncts: Vec<Expression>,
    outputs: Vec<Expression>,
}

impl Side {
    /// Replaces references to a projection's outputs with their definitions
    fn inline_projection(&mut self, items: &[ProjectItem]) {
        let defs: HashMap<&ColumnRef, &Expression> = items.iter().map(|i| (&i.output, &i.expr)).collect();
        let mut substitute = |e: &Expression| match e {
            Expression::Column(c) => defs.get(c).map(|d| (*d).clone()),
            _ => None,
        };
        for expr in self.conjuncts.iter_mut().chain(self.outputs.iter_mut()) {
            *expr = expr.transform(&mut substitute);
        }
    }

    fn add_predicate(&mut self, predicate: &Expression) {
        self.conjuncts.extend(predicate.split_conjunction());
    }
}

#[derive(Debug, Clone, Default)]
struct MatchState {
    /// View column qualifier to query column qualifier
    qualifiers: BTreeMap<String, String>,
    view: Side,
    query: Side,
}

impl MatchState {
    fn map_qualifier(&mut self, view: &str, query: &str) -> Result<(), String> {
        match self.qualifiers.get(view) {
            Some(existing) if existing == query => Ok(()),
            Some(existing) => Err(format!(
                "view relation {} already paired with {}, not {}",
                view, existing, query
            )),
            None => {
                if self.qualifiers.values().any(|q| q == query) {
                    return Err(format!("query relation {} is already paired", query));
                }
                self.qualifiers.insert(view.to_string(), query.to_string());
                Ok(())
            }
        }
    }

    /// Rewrites a view expression into the query's column namespace
    fn translate(&self, expr: &Expression) -> Expression {
        let translated = expr.transform(&mut |e| match e {
            Expression::Column(c) => self.translate_column(c).map(Expression::Column),
            _ => None,
        });
        canonicalize_expr(&translated)
    }

    fn translate_column(&self, column: &ColumnRef) -> Option<ColumnRef> {
        let qualifier = column.table.as_ref()?;
        self.qualifiers
            .get(qualifier)
            .map(|q| ColumnRef::new(q.clone(), column.name.clone()))
    }
}

/// Outcome of pairing a view definition with a query subtree.
///
/// Output lists are described over base-table columns in the query's
/// namespace. For aggregations they hold the group keys followed by one
/// entry per aggregate argument (`NULL` for `COUNT(*)`).
#[derive(Debug, Clone)]
pub struct StructuralMatch {
    /// Position of the matched subtree in the canonical query
    pub path: NodePath,
    pub view_outputs: Vec<Expression>,
    pub query_outputs: Vec<Expression>,
    /// Query conjuncts the view does not already guarantee
    pub compensation: Vec<Expression>,
    /// Predicates holding on every row of the view's input
    pub view_predicates: PredicateSet,
    /// Predicates holding on every row of the query subtree's input
    pub query_predicates: PredicateSet,
}

/// Output expressions of a node, before inlining
fn output_exprs(node: &OperatorNode) -> Vec<Expression> {
    node.output_columns().into_iter().map(Expression::Column).collect()
}

/// Group keys followed by aggregate arguments
fn aggregate_exprs(node: &OperatorNode) -> Vec<Expression> {
    match node {
        OperatorNode::Aggregate { group_by, aggregates, .. } => group_by
            .iter()
            .cloned()
            .chain(
                aggregates
                    .iter()
                    .map(|a| a.arg.clone().unwrap_or(Expression::Literal(ScalarValue::Null))),
            )
            .collect(),
        _ => vec![],
    }
}

/// Finds the outermost query subtree the view can stand in for.
///
/// An aggregate view is only tried against query aggregations; any other
/// view is only tried against subtrees without aggregation. On failure the
/// detail of the first attempted pairing is returned.
pub fn find_match(view: &MaterializedView, query: &OperatorNode) -> Result<StructuralMatch, String> {
    let mut first_failure = None;
    for (path, node) in query.preorder() {
        let attempt = match (view.canonical(), node) {
            (
                OperatorNode::Aggregate { input: view_input, .. },
                OperatorNode::Aggregate { input: query_input, .. },
            ) => {
                let state = MatchState {
                    view: Side {
                        conjuncts: vec![],
                        outputs: aggregate_exprs(view.canonical()),
                    },
                    query: Side {
                        conjuncts: vec![],
                        outputs: aggregate_exprs(node),
                    },
                    ..MatchState::default()
                };
                match_subtrees(view_input, query_input, state)
            }
            (OperatorNode::Aggregate { .. }, _) => continue,
            (_, n) if n.contains_aggregate() => continue,
            (definition, _) => {
                let state = MatchState {
                    view: Side {
                        conjuncts: vec![],
                        outputs: output_exprs(definition),
                    },
                    query: Side {
                        conjuncts: vec![],
                        outputs: output_exprs(node),
                    },
                    ..MatchState::default()
                };
                match_subtrees(definition, node, state)
            }
        };
        match attempt {
            Ok(mut matched) => {
                trace!("view {} matches query subtree at {:?}", view.name(), path);
                matched.path = path;
                return Ok(matched);
            }
            Err(detail) => {
                trace!("view {} does not match at {:?}: {}", view.name(), path, detail);
                first_failure.get_or_insert(detail);
            }
        }
    }
    Err(first_failure.unwrap_or_else(|| {
        if view.is_aggregate() {
            "query has no aggregation".to_string()
        } else {
            "query has no subtree free of aggregation".to_string()
        }
    }))
}

fn match_subtrees(
    view: &OperatorNode,
    query: &OperatorNode,
    mut state: MatchState,
) -> Result<StructuralMatch, String> {
    match_block(view, query, &mut state)?;
    finalize(state)
}

fn match_block(view: &OperatorNode, query: &OperatorNode, state: &mut MatchState) -> Result<(), String> {
    match (view, query) {
        (OperatorNode::Filter { predicate, input }, _) => {
            state.view.add_predicate(predicate);
            match_block(input, query, state)
        }
        (_, OperatorNode::Filter { predicate, input }) => {
            state.query.add_predicate(predicate);
            match_block(view, input, state)
        }
        (OperatorNode::Project { items, input }, _) => {
            state.view.inline_projection(items);
            match_block(input, query, state)
        }
        (_, OperatorNode::Project { items, input }) => {
            state.query.inline_projection(items);
            match_block(view, input, state)
        }
        (OperatorNode::Scan { table: view_table, .. }, OperatorNode::Scan { table: query_table, .. }) => {
            if view_table != query_table {
                return Err(format!("scan of {} does not match scan of {}", view_table, query_table));
            }
            let view_qualifier = view.scan_qualifier().unwrap_or(view_table);
            let query_qualifier = query.scan_qualifier().unwrap_or(query_table);
            state.map_qualifier(view_qualifier, query_qualifier)
        }
        (
            OperatorNode::Join {
                left: view_left,
                right: view_right,
                condition: view_condition,
                kind: view_kind,
                ..
            },
            OperatorNode::Join {
                left: query_left,
                right: query_right,
                condition: query_condition,
                kind: query_kind,
                ..
            },
        ) if view_kind.is_inner() && query_kind.is_inner() => {
            state.view.add_predicate(view_condition);
            state.query.add_predicate(query_condition);

            let mut straight = state.clone();
            let straight_result = match_block(view_left, query_left, &mut straight)
                .and_then(|_| match_block(view_right, query_right, &mut straight));
            match straight_result {
                Ok(()) => {
                    *state = straight;
                    Ok(())
                }
                Err(detail) => {
                    let mut crossed = state.clone();
                    match_block(view_left, query_right, &mut crossed)
                        .and_then(|_| match_block(view_right, query_left, &mut crossed))
                        .map_err(|_| detail)?;
                    *state = crossed;
                    Ok(())
                }
            }
        }
        (OperatorNode::Join { .. }, OperatorNode::Join { .. })
        | (OperatorNode::Aggregate { .. }, OperatorNode::Aggregate { .. }) => exact_match(view, query, state),
        _ => Err(format!(
            "{} in the view does not match {} in the query",
            view.kind_name(),
            query.kind_name()
        )),
    }
}

/// Requires two subtrees to be identical up to the qualifier mapping
fn exact_match(view: &OperatorNode, query: &OperatorNode, state: &mut MatchState) -> Result<(), String> {
    let mismatch = || {
        Err(format!(
            "{} in the view differs from {} in the query",
            view.kind_name(),
            query.kind_name()
        ))
    };
    match (view, query) {
        (OperatorNode::Scan { table: vt, .. }, OperatorNode::Scan { table: qt, .. }) => {
            if vt != qt {
                return mismatch();
            }
            state.map_qualifier(view.scan_qualifier().unwrap_or(vt), query.scan_qualifier().unwrap_or(qt))
        }
        (
            OperatorNode::Filter { predicate: vp, input: vi },
            OperatorNode::Filter { predicate: qp, input: qi },
        ) => {
            exact_match(vi, qi, state)?;
            if state.translate(vp) != *qp {
                return mismatch();
            }
            Ok(())
        }
        (
            OperatorNode::Project { items: v_items, input: vi },
            OperatorNode::Project { items: q_items, input: qi },
        ) => {
            exact_match(vi, qi, state)?;
            let same = v_items.len() == q_items.len()
                && v_items.iter().zip(q_items).all(|(v, q)| {
                    state.translate(&v.expr) == q.expr
                        && state.translate_column(&v.output).unwrap_or_else(|| v.output.clone()) == q.output
                });
            if !same {
                return mismatch();
            }
            Ok(())
        }
        (
            OperatorNode::Aggregate {
                group_by: v_keys,
                aggregates: v_aggs,
                input: vi,
            },
            OperatorNode::Aggregate {
                group_by: q_keys,
                aggregates: q_aggs,
                input: qi,
            },
        ) => {
            exact_match(vi, qi, state)?;
            let keys_same = v_keys.len() == q_keys.len()
                && v_keys.iter().zip(q_keys).all(|(v, q)| state.translate(v) == *q);
            let aggs_same = v_aggs.len() == q_aggs.len()
                && v_aggs.iter().zip(q_aggs).all(|(v, q)| {
                    v.func == q.func
                        && v.distinct == q.distinct
                        && v.alias == q.alias
                        && v.arg.as_ref().map(|a| state.translate(a)) == q.arg
                });
            if !(keys_same && aggs_same) {
                return mismatch();
            }
            Ok(())
        }
        (
            OperatorNode::Join {
                left: vl,
                right: vr,
                condition: vc,
                kind: vk,
                commuted: v_commuted,
            },
            OperatorNode::Join {
                left: ql,
                right: qr,
                condition: qc,
                kind: qk,
                commuted: q_commuted,
            },
        ) => {
            if vk != qk || v_commuted != q_commuted {
                return mismatch();
            }
            exact_match(vl, ql, state)?;
            exact_match(vr, qr, state)?;
            if state.translate(vc) != *qc {
                return mismatch();
            }
            Ok(())
        }
        _ => mismatch(),
    }
}

fn canonical_conjuncts(exprs: impl IntoIterator<Item = Expression>) -> Vec<Expression> {
    let mut out: Vec<Expression> = exprs
        .into_iter()
        .flat_map(|e| canonicalize_expr(&e).split_conjunction())
        .filter(|e| *e != Expression::Literal(ScalarValue::Boolean(true)))
        .collect();
    out.sort();
    out.dedup_by(|a, b| a == b && a.is_deterministic());
    out
}

fn finalize(state: MatchState) -> Result<StructuralMatch, String> {
    let view_conjuncts = canonical_conjuncts(state.view.conjuncts.iter().map(|c| state.translate(c)));
    let query_conjuncts = canonical_conjuncts(state.query.conjuncts.iter().cloned());

    let query_predicates = PredicateSet::new(&query_conjuncts);
    if let Some(missing) = view_conjuncts.iter().find(|c| !query_predicates.implies(c)) {
        return Err(format!("view predicate {} is not implied by the query", missing));
    }
    trace!("view predicates subsumed");

    let view_predicates = PredicateSet::new(&view_conjuncts);
    let compensation = query_conjuncts
        .into_iter()
        .filter(|c| !view_predicates.implies(c))
        .collect();

    Ok(StructuralMatch {
        path: NodePath::new(),
        view_outputs: state.view.outputs.iter().map(|e| state.translate(e)).collect(),
        query_outputs: state.query.outputs.iter().map(canonicalize_expr).collect(),
        compensation,
        view_predicates,
        query_predicates,
    })
}

/// Rewrites `expr` over a set of available expressions.
///
/// `available` pairs an expression with the column that holds its value.
/// Sub-expressions equal (under `classes`) to an available expression become
/// that column; sub-expressions pinned to a constant become the literal.
/// Returns `None` if some column reference cannot be covered, or if the
/// expression is non-deterministic.
pub fn express_over(
    expr: &Expression,
    available: &[(Expression, ColumnRef)],
    classes: &EquivalenceClasses,
) -> Option<Expression> {
    if !expr.is_deterministic() {
        return None;
    }
    let normalized = classes.normalize(expr);
    if let Some((_, column)) = available
        .iter()
        .find(|(candidate, _)| classes.normalize(candidate) == normalized)
    {
        return Some(Expression::Column(column.clone()));
    }
    if let Some(value) = classes.constant_of(&normalized) {
        return Some(Expression::Literal(value));
    }
    match expr {
        Expression::Literal(_) => Some(expr.clone()),
        Expression::Column(_) => None,
        Expression::Function { name, args } => {
            let args = args
                .iter()
                .map(|a| express_over(a, available, classes))
                .collect::<Option<Vec<_>>>()?;
            Some(Expression::Function {
                name: name.clone(),
                args,
            })
        }
        Expression::BinaryOp { left, op, right } => Some(Expression::binary(
            express_over(left, available, classes)?,
            *op,
            express_over(right, available, classes)?,
        )),
    }
}
