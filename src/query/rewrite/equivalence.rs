// Equivalence Classes and Predicate Implication
//
// Expressions proven equal by the equality predicates in scope share a class.
// A `PredicateSet` adds value ranges per class and the leftover "residual"
// conjuncts, and answers whether a single conjunct is implied by the set.
// Every test is conservative: anything that cannot be proven is "not implied".

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use log::trace;

use crate::common::ClassId;
use crate::query::planner::expression::{BinaryOperator, Expression, ScalarValue};
use crate::query::planner::logical::{JoinKind, OperatorNode};

/// Union-find over expressions
#[derive(Debug, Clone, Default)]
pub struct EquivalenceClasses {
    members: Vec<Expression>,
    index: HashMap<Expression, usize>,
    parent: Vec<usize>,
}

impl EquivalenceClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes implied by the `a = b` conjuncts of a predicate list
    pub fn from_conjuncts(conjuncts: &[Expression]) -> Self {
        let mut classes = Self::new();
        for conjunct in conjuncts {
            if let Expression::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } = conjunct
            {
                if left.is_literal() && right.is_literal() {
                    continue;
                }
                if !left.is_deterministic() || !right.is_deterministic() {
                    continue;
                }
                if let (Some(v), _) | (_, Some(v)) = (left.as_literal(), right.as_literal()) {
                    if v.is_null() {
                        continue;
                    }
                }
                classes.union(left, right);
            }
        }
        classes
    }

    /// Classes for the predicates visible at `node`
    pub fn from_plan(node: &OperatorNode) -> Self {
        Self::from_conjuncts(&visible_conjuncts(node))
    }

    fn intern(&mut self, expr: &Expression) -> usize {
        if let Some(&i) = self.index.get(expr) {
            return i;
        }
        let i = self.members.len();
        self.members.push(expr.clone());
        self.parent.push(i);
        self.index.insert(expr.clone(), i);
        i
    }

    fn find(&self, mut i: usize) -> usize {
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    pub fn union(&mut self, a: &Expression, b: &Expression) {
        let (ia, ib) = (self.intern(a), self.intern(b));
        let (ra, rb) = (self.find(ia), self.find(ib));
        if ra == rb {
            return;
        }
        // keep the structurally smallest member as root so representatives are stable
        if self.members[ra] <= self.members[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[ra] = rb;
        }
    }

    /// True if the expression took part in an equality predicate
    pub fn contains(&self, expr: &Expression) -> bool {
        self.index.contains_key(expr)
    }

    pub fn same_class(&self, a: &Expression, b: &Expression) -> bool {
        a == b || self.normalize(a) == self.normalize(b)
    }

    /// Members of the class containing `expr` (just `expr` if it is in none)
    pub fn class_members(&self, expr: &Expression) -> Vec<Expression> {
        match self.index.get(expr) {
            None => vec![expr.clone()],
            Some(&i) => {
                let root = self.find(i);
                let mut members: Vec<Expression> = (0..self.members.len())
                    .filter(|&j| self.find(j) == root)
                    .map(|j| self.members[j].clone())
                    .collect();
                members.sort();
                members
            }
        }
    }

    /// A literal the expression's class is pinned to, if any
    pub fn constant_of(&self, expr: &Expression) -> Option<ScalarValue> {
        if let Expression::Literal(v) = expr {
            return Some(v.clone());
        }
        let &i = self.index.get(expr)?;
        let root = self.find(i);
        (0..self.members.len())
            .filter(|&j| self.find(j) == root)
            .find_map(|j| self.members[j].as_literal().cloned())
    }

    /// True if some class holds two different literals
    pub fn is_contradictory(&self) -> bool {
        let mut pinned: HashMap<usize, &ScalarValue> = HashMap::new();
        for (i, member) in self.members.iter().enumerate() {
            if let Expression::Literal(v) = member {
                let root = self.find(i);
                match pinned.get(&root) {
                    Some(existing) if existing.compare(v) != Some(Ordering::Equal) => return true,
                    Some(_) => {}
                    None => {
                        pinned.insert(root, v);
                    }
                }
            }
        }
        false
    }

    /// Rewrites every sub-expression to its class representative
    pub fn normalize(&self, expr: &Expression) -> Expression {
        if let Some(&i) = self.index.get(expr) {
            return self.members[self.find(i)].clone();
        }
        let rebuilt = match expr {
            Expression::Column(_) | Expression::Literal(_) => return expr.clone(),
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args.iter().map(|a| self.normalize(a)).collect(),
            },
            Expression::BinaryOp { left, op, right } => {
                Expression::binary(self.normalize(left), *op, self.normalize(right))
            }
        };
        match self.index.get(&rebuilt) {
            Some(&i) => self.members[self.find(i)].clone(),
            None => rebuilt,
        }
    }
}

/// Conjuncts that hold for every output row of `node`.
///
/// Filter predicates and inner-join conditions count; anything under the
/// null-supplying side of an outer join, and outer-join conditions, do not.
pub fn visible_conjuncts(node: &OperatorNode) -> Vec<Expression> {
    let mut out = Vec::new();
    collect_visible(node, &mut out);
    out
}

fn collect_visible(node: &OperatorNode, out: &mut Vec<Expression>) {
    match node {
        OperatorNode::Scan { .. } => {}
        OperatorNode::Filter { predicate, input } => {
            out.extend(predicate.split_conjunction());
            collect_visible(input, out);
        }
        OperatorNode::Project { input, .. } | OperatorNode::Aggregate { input, .. } => {
            collect_visible(input, out);
        }
        OperatorNode::Join {
            left,
            right,
            condition,
            kind,
            ..
        } => match kind {
            JoinKind::Inner => {
                out.extend(condition.split_conjunction());
                collect_visible(left, out);
                collect_visible(right, out);
            }
            JoinKind::Left => collect_visible(left, out),
            JoinKind::Right => collect_visible(right, out),
            JoinKind::Full => {}
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bound {
    value: ScalarValue,
    inclusive: bool,
}

/// A (possibly half-open) interval of comparable values
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl Interval {
    pub fn unbounded() -> Self {
        Interval {
            lower: None,
            upper: None,
        }
    }

    pub fn point(value: ScalarValue) -> Self {
        Interval {
            lower: Some(Bound {
                value: value.clone(),
                inclusive: true,
            }),
            upper: Some(Bound {
                value,
                inclusive: true,
            }),
        }
    }

    /// Interval of values `v` satisfying `v op value`
    pub fn from_comparison(op: BinaryOperator, value: &ScalarValue) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        let bound = |inclusive| {
            Some(Bound {
                value: value.clone(),
                inclusive,
            })
        };
        let interval = match op {
            BinaryOperator::Eq => Interval::point(value.clone()),
            BinaryOperator::Lt => Interval { lower: None, upper: bound(false) },
            BinaryOperator::LtEq => Interval { lower: None, upper: bound(true) },
            BinaryOperator::Gt => Interval { lower: bound(false), upper: None },
            BinaryOperator::GtEq => Interval { lower: bound(true), upper: None },
            _ => return None,
        };
        Some(interval)
    }

    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => match l.value.compare(&u.value) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => !(l.inclusive && u.inclusive),
                _ => false,
            },
            _ => false,
        }
    }

    /// Intersection; `None` when bounds are of incomparable types
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lower = match (&self.lower, &other.lower) {
            (None, b) | (b, None) => b.clone(),
            (Some(a), Some(b)) => Some(match a.value.compare(&b.value)? {
                Ordering::Greater => a.clone(),
                Ordering::Less => b.clone(),
                Ordering::Equal => Bound {
                    value: a.value.clone(),
                    inclusive: a.inclusive && b.inclusive,
                },
            }),
        };
        let upper = match (&self.upper, &other.upper) {
            (None, b) | (b, None) => b.clone(),
            (Some(a), Some(b)) => Some(match a.value.compare(&b.value)? {
                Ordering::Less => a.clone(),
                Ordering::Greater => b.clone(),
                Ordering::Equal => Bound {
                    value: a.value.clone(),
                    inclusive: a.inclusive && b.inclusive,
                },
            }),
        };
        Some(Interval { lower, upper })
    }

    /// True if every value of `other` lies in `self`
    pub fn contains(&self, other: &Interval) -> bool {
        if other.is_empty() {
            return true;
        }
        let lower_ok = match (&self.lower, &other.lower) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(s), Some(o)) => match o.value.compare(&s.value) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => s.inclusive || !o.inclusive,
                _ => false,
            },
        };
        let upper_ok = match (&self.upper, &other.upper) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(s), Some(o)) => match o.value.compare(&s.value) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => s.inclusive || !o.inclusive,
                _ => false,
            },
        };
        lower_ok && upper_ok
    }

    pub fn contains_value(&self, value: &ScalarValue) -> bool {
        self.contains(&Interval::point(value.clone()))
    }
}

/// Splits `expr op literal` (in either orientation) into its parts
fn as_comparison_with_literal(conjunct: &Expression) -> Option<(&Expression, BinaryOperator, &ScalarValue)> {
    match conjunct {
        Expression::BinaryOp { left, op, right } if op.is_comparison() => {
            match (left.as_literal(), right.as_literal()) {
                (None, Some(v)) => Some((left, *op, v)),
                (Some(v), None) => Some((right, op.swap()?, v)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Equivalence classes, per-class ranges and residual conjuncts of a predicate list
#[derive(Debug, Clone, Default)]
pub struct PredicateSet {
    classes: EquivalenceClasses,
    ranges: HashMap<Expression, Interval>,
    residuals: BTreeSet<Expression>,
    contradiction: bool,
}

impl PredicateSet {
    pub fn new(conjuncts: &[Expression]) -> Self {
        let classes = EquivalenceClasses::from_conjuncts(conjuncts);
        let mut set = PredicateSet {
            contradiction: classes.is_contradictory(),
            classes,
            ranges: HashMap::new(),
            residuals: BTreeSet::new(),
        };
        for conjunct in conjuncts {
            set.insert_conjunct(conjunct);
        }
        set
    }

    fn insert_conjunct(&mut self, conjunct: &Expression) {
        match conjunct {
            Expression::Literal(ScalarValue::Boolean(true)) => return,
            Expression::Literal(_) => {
                self.contradiction = true;
                return;
            }
            _ => {}
        }
        if let Some((expr, op, value)) = as_comparison_with_literal(conjunct) {
            if let Some(interval) = Interval::from_comparison(op, value) {
                let key = self.classes.normalize(expr);
                let merged = match self.ranges.get(&key) {
                    None => Some(interval),
                    Some(existing) => existing.intersect(&interval),
                };
                if let Some(merged) = merged {
                    if merged.is_empty() {
                        self.contradiction = true;
                    }
                    self.ranges.insert(key, merged);
                    return;
                }
            }
        }
        if let Expression::BinaryOp {
            op: BinaryOperator::Eq,
            left,
            right,
        } = conjunct
        {
            if !left.is_literal() && !right.is_literal() {
                // captured by the equivalence classes
                return;
            }
        }
        self.residuals.insert(self.classes.normalize(conjunct));
    }

    pub fn classes(&self) -> &EquivalenceClasses {
        &self.classes
    }

    /// True if the predicates admit no row at all
    pub fn is_contradiction(&self) -> bool {
        self.contradiction
    }

    fn range_of(&self, expr: &Expression) -> Option<Interval> {
        let key = self.classes.normalize(expr);
        match (self.ranges.get(&key), self.classes.constant_of(&key)) {
            (Some(r), Some(v)) => r.intersect(&Interval::point(v)).or_else(|| Some(r.clone())),
            (Some(r), None) => Some(r.clone()),
            (None, Some(v)) => Some(Interval::point(v)),
            (None, None) => None,
        }
    }

    /// True if every row satisfying this set also satisfies `conjunct`
    pub fn implies(&self, conjunct: &Expression) -> bool {
        if self.contradiction {
            return true;
        }
        if let Expression::Literal(ScalarValue::Boolean(true)) = conjunct {
            return true;
        }
        if !conjunct.is_deterministic() {
            return false;
        }
        if let Expression::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } = conjunct
        {
            if !left.is_literal()
                && !right.is_literal()
                && self.classes.contains(left)
                && self.classes.same_class(left, right)
            {
                trace!("{} implied by equivalence", conjunct);
                return true;
            }
        }
        if let Some((expr, op, value)) = as_comparison_with_literal(conjunct) {
            if let Some(range) = self.range_of(expr) {
                let implied = match op {
                    BinaryOperator::NotEq => {
                        !range.is_empty() && range_comparable(&range, value) && !range.contains_value(value)
                    }
                    _ => Interval::from_comparison(op, value).is_some_and(|wanted| wanted.contains(&range)),
                };
                if implied {
                    trace!("{} implied by range", conjunct);
                    return true;
                }
            }
        }
        self.residuals.contains(&self.classes.normalize(conjunct))
    }
}

/// True if the range's bounds compare with `value`, so exclusion is meaningful
fn range_comparable(range: &Interval, value: &ScalarValue) -> bool {
    let lower = range.lower.as_ref().is_none_or(|b| b.value.compare(value).is_some());
    let upper = range.upper.as_ref().is_none_or(|b| b.value.compare(value).is_some());
    (range.lower.is_some() || range.upper.is_some()) && lower && upper
}

/// Id assignment for expressions under one set of classes
#[derive(Debug, Clone, Default)]
pub struct ClassIds {
    ids: HashMap<Expression, ClassId>,
}

impl ClassIds {
    /// Tags `expr` (after normalization) with an id, returning it
    pub fn assign(&mut self, classes: &EquivalenceClasses, expr: &Expression) -> ClassId {
        let key = classes.normalize(expr);
        let next = self.ids.len() as ClassId;
        *self.ids.entry(key).or_insert(next)
    }

    pub fn get(&self, classes: &EquivalenceClasses, expr: &Expression) -> Option<ClassId> {
        self.ids.get(&classes.normalize(expr)).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
