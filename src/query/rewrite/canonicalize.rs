// Plan Canonicalizer
//
// Brings a query plan or a view definition into one comparable shape:
// operands of commutative operators sorted by the structural key, associative
// chains flattened and rebuilt left-deep, constant sub-expressions folded,
// stacked filters merged and inner-join inputs ordered. Canonicalization never
// fails; shapes it does not understand are left as they are.

use crate::common::ClassId;
use crate::query::planner::expression::{
    eval_binary, eval_function, function_info, BinaryOperator, Expression, ScalarValue,
};
use crate::query::planner::logical::{AggregateCall, JoinKind, OperatorNode, ProjectItem};
use crate::query::rewrite::equivalence::{ClassIds, EquivalenceClasses};

/// A canonical plan and the equivalence classes of its visible predicates
#[derive(Debug, Clone)]
pub struct CanonicalPlan {
    pub root: OperatorNode,
    classes: EquivalenceClasses,
    ids: ClassIds,
}

impl CanonicalPlan {
    pub fn classes(&self) -> &EquivalenceClasses {
        &self.classes
    }

    /// Class id of an expression appearing in the plan.
    ///
    /// Two expressions share an id iff they are equal after replacing every
    /// sub-expression by its class representative.
    pub fn class_of(&self, expr: &Expression) -> Option<ClassId> {
        self.ids.get(&self.classes, &canonicalize_expr(expr))
    }

    /// Number of distinct classes among the plan's expressions
    pub fn class_count(&self) -> usize {
        self.ids.len()
    }
}

/// Canonicalizes a plan and tags its expressions with class ids
pub fn canonicalize(plan: &OperatorNode) -> CanonicalPlan {
    let root = canonicalize_plan(plan);
    let classes = EquivalenceClasses::from_plan(&root);
    let mut ids = ClassIds::default();
    for (_, node) in root.preorder() {
        for expr in node_expressions(node) {
            tag_subexpressions(expr, &classes, &mut ids);
        }
    }
    CanonicalPlan { root, classes, ids }
}

fn tag_subexpressions(expr: &Expression, classes: &EquivalenceClasses, ids: &mut ClassIds) {
    ids.assign(classes, expr);
    match expr {
        Expression::Column(_) | Expression::Literal(_) => {}
        Expression::Function { args, .. } => {
            for arg in args {
                tag_subexpressions(arg, classes, ids);
            }
        }
        Expression::BinaryOp { left, right, .. } => {
            tag_subexpressions(left, classes, ids);
            tag_subexpressions(right, classes, ids);
        }
    }
}

/// Expressions held directly by a node (not its children)
pub fn node_expressions(node: &OperatorNode) -> Vec<&Expression> {
    match node {
        OperatorNode::Scan { .. } => vec![],
        OperatorNode::Filter { predicate, .. } => vec![predicate],
        OperatorNode::Project { items, .. } => items.iter().map(|i| &i.expr).collect(),
        OperatorNode::Aggregate { group_by, aggregates, .. } => group_by
            .iter()
            .chain(aggregates.iter().filter_map(|a| a.arg.as_ref()))
            .collect(),
        OperatorNode::Join { condition, .. } => vec![condition],
    }
}

/// Canonical form of an operator tree. Output columns and their order are preserved.
pub fn canonicalize_plan(node: &OperatorNode) -> OperatorNode {
    match node {
        OperatorNode::Scan { .. } => node.clone(),

        OperatorNode::Filter { predicate, input } => {
            let mut input = canonicalize_plan(input);
            let mut predicate = canonicalize_expr(predicate);
            if let OperatorNode::Filter {
                predicate: inner,
                input: inner_input,
            } = input
            {
                predicate = canonicalize_expr(&Expression::binary(inner, BinaryOperator::And, predicate));
                input = *inner_input;
            }
            if predicate == Expression::Literal(ScalarValue::Boolean(true)) {
                return input;
            }
            OperatorNode::Filter {
                predicate,
                input: Box::new(input),
            }
        }

        OperatorNode::Project { items, input } => OperatorNode::Project {
            items: items
                .iter()
                .map(|item| ProjectItem {
                    expr: canonicalize_expr(&item.expr),
                    output: item.output.clone(),
                })
                .collect(),
            input: Box::new(canonicalize_plan(input)),
        },

        OperatorNode::Aggregate {
            group_by,
            aggregates,
            input,
        } => {
            let canonical = OperatorNode::Aggregate {
                group_by: group_by.iter().map(canonicalize_expr).collect(),
                aggregates: aggregates
                    .iter()
                    .map(|a| AggregateCall {
                        arg: a.arg.as_ref().map(canonicalize_expr),
                        ..a.clone()
                    })
                    .collect(),
                input: Box::new(canonicalize_plan(input)),
            };
            // an expression key is named by its text, which canonicalization may change
            let original = node.output_columns();
            let renamed = canonical.output_columns();
            if renamed == original {
                return canonical;
            }
            OperatorNode::Project {
                items: renamed
                    .into_iter()
                    .zip(original)
                    .map(|(from, to)| ProjectItem {
                        expr: Expression::Column(from),
                        output: to,
                    })
                    .collect(),
                input: Box::new(canonical),
            }
        }

        OperatorNode::Join {
            left,
            right,
            condition,
            kind,
            commuted,
        } => {
            let mut left = canonicalize_plan(left);
            let mut right = canonicalize_plan(right);
            let mut commuted = *commuted;
            if *kind == JoinKind::Inner && right < left {
                std::mem::swap(&mut left, &mut right);
                commuted = !commuted;
            }
            OperatorNode::Join {
                left: Box::new(left),
                right: Box::new(right),
                condition: canonicalize_expr(condition),
                kind: *kind,
                commuted,
            }
        }
    }
}

/// Canonical form of a view definition.
///
/// A renaming projection over the root aggregate is dropped, since view
/// columns are addressed by position rather than by name.
pub fn canonicalize_definition(definition: &OperatorNode) -> OperatorNode {
    match canonicalize_plan(definition) {
        OperatorNode::Project { items, input } if is_positional_rename(&items, &input) => *input,
        other => other,
    }
}

fn is_positional_rename(items: &[ProjectItem], input: &OperatorNode) -> bool {
    let columns = input.output_columns();
    matches!(input, OperatorNode::Aggregate { .. })
        && items.len() == columns.len()
        && items
            .iter()
            .zip(&columns)
            .all(|(item, column)| item.expr == Expression::Column(column.clone()))
}

/// Canonical form of a scalar expression
pub fn canonicalize_expr(expr: &Expression) -> Expression {
    match expr {
        Expression::Column(_) | Expression::Literal(_) => expr.clone(),
        Expression::Function { name, args } => canonicalize_function(name, args),
        Expression::BinaryOp { left, op, right } => {
            let left = canonicalize_expr(left);
            let right = canonicalize_expr(right);
            if op.is_associative() {
                canonicalize_chain(*op, left, right)
            } else {
                canonicalize_binary(*op, left, right)
            }
        }
    }
}

fn canonicalize_function(name: &str, args: &[Expression]) -> Expression {
    let name = name.to_ascii_lowercase();
    let mut args: Vec<Expression> = args.iter().map(canonicalize_expr).collect();

    if let Some(info) = function_info(&name) {
        if info.associative {
            args = args
                .into_iter()
                .flat_map(|arg| match arg {
                    Expression::Function { name: inner, args } if inner == name => args,
                    other => vec![other],
                })
                .collect();
        }
        if info.commutative {
            args.sort();
        }
        if info.deterministic {
            let literals: Option<Vec<ScalarValue>> =
                args.iter().map(|a| a.as_literal().cloned()).collect();
            if let Some(value) = literals.and_then(|values| eval_function(&name, &values)) {
                return Expression::Literal(value);
            }
        }
    }
    Expression::Function { name, args }
}

fn canonicalize_binary(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    if let (Some(l), Some(r)) = (left.as_literal(), right.as_literal()) {
        if let Some(value) = eval_binary(op, l, r) {
            return Expression::Literal(value);
        }
    }
    if (op.is_commutative() || op.is_comparison()) && right < left {
        if let Some(swapped) = op.swap() {
            return Expression::binary(right, swapped, left);
        }
    }
    Expression::binary(left, op, right)
}

fn flatten_into(op: BinaryOperator, expr: Expression, out: &mut Vec<Expression>) {
    match expr {
        Expression::BinaryOp { left, op: inner, right } if inner == op => {
            flatten_into(op, *left, out);
            flatten_into(op, *right, out);
        }
        other => out.push(other),
    }
}

fn canonicalize_chain(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    let mut operands = Vec::new();
    flatten_into(op, left, &mut operands);
    flatten_into(op, right, &mut operands);

    let (literals, mut rest): (Vec<Expression>, Vec<Expression>) =
        operands.into_iter().partition(|e| e.is_literal());

    match op {
        BinaryOperator::And | BinaryOperator::Or => {
            // x AND FALSE is FALSE, x OR TRUE is TRUE
            let absorbing = ScalarValue::Boolean(op == BinaryOperator::Or);
            let mut saw_null = false;
            for literal in &literals {
                match literal.as_literal() {
                    Some(v) if *v == absorbing => return Expression::Literal(absorbing),
                    Some(ScalarValue::Boolean(_)) => {}
                    Some(ScalarValue::Null) => saw_null = true,
                    _ => rest.push(literal.clone()),
                }
            }
            if saw_null {
                rest.push(Expression::Literal(ScalarValue::Null));
            }
            rest.sort();
            rest.dedup_by(|a, b| a == b && a.is_deterministic());
            if rest.is_empty() {
                // the identity element
                return Expression::Literal(ScalarValue::Boolean(op == BinaryOperator::And));
            }
        }
        _ => {
            let integers: Option<Vec<i64>> = literals
                .iter()
                .map(|l| match l.as_literal() {
                    Some(ScalarValue::Integer(i)) => Some(*i),
                    _ => None,
                })
                .collect();
            let folded = integers.and_then(|values| {
                values.into_iter().try_fold(None::<i64>, |acc, v| match acc {
                    None => Some(Some(v)),
                    Some(a) => match op {
                        BinaryOperator::Plus => a.checked_add(v).map(Some),
                        _ => a.checked_mul(v).map(Some),
                    },
                })
            });
            match folded {
                Some(Some(v)) => rest.push(Expression::Literal(ScalarValue::Integer(v))),
                Some(None) => {}
                None => {
                    if literals.iter().any(|l| l.as_literal().is_some_and(|v| v.is_null())) {
                        return Expression::Literal(ScalarValue::Null);
                    }
                    rest.extend(literals);
                }
            }
            rest.sort();
        }
    }

    if rest.iter().all(|e| e.is_literal()) && rest.len() > 1 {
        if let Some(value) = fold_literals(op, &rest) {
            return Expression::Literal(value);
        }
    }

    let mut iter = rest.into_iter();
    match iter.next() {
        Some(first) => iter.fold(first, |acc, next| Expression::binary(acc, op, next)),
        None => Expression::Literal(ScalarValue::Boolean(op == BinaryOperator::And)),
    }
}

fn fold_literals(op: BinaryOperator, operands: &[Expression]) -> Option<ScalarValue> {
    let mut iter = operands.iter().map(|e| e.as_literal());
    let mut acc = iter.next()??.clone();
    for next in iter {
        acc = eval_binary(op, &acc, next?)?;
    }
    Some(acc)
}
