// Scalar Expression Model
//
// This module defines the expressions carried by operator nodes, the literal
// values they fold to, and the registry of scalar functions the canonicalizer
// and the reference evaluator agree on.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Literal values. Arbitrary-precision numerics are out of scope; literals are
/// treated as opaque comparable values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    fn rank(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Boolean(_) => 1,
            ScalarValue::Integer(_) => 2,
            ScalarValue::Float(_) => 3,
            ScalarValue::Text(_) => 4,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn is_true(&self) -> bool {
        matches!(self, ScalarValue::Boolean(true))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Integer(i) => Some(*i as f64),
            ScalarValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// SQL comparison. NULL and values of unrelated types are incomparable.
    pub fn compare(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Null, _) | (_, ScalarValue::Null) => None,
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => Some(a.cmp(b)),
            (ScalarValue::Integer(a), ScalarValue::Integer(b)) => Some(a.cmp(b)),
            (ScalarValue::Text(a), ScalarValue::Text(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Boolean(b) => b.hash(state),
            ScalarValue::Integer(i) => i.hash(state),
            ScalarValue::Float(f) => f.to_bits().hash(state),
            ScalarValue::Text(s) => s.hash(state),
        }
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Structural order used for sorting operands, not SQL comparison
impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
            (ScalarValue::Integer(a), ScalarValue::Integer(b)) => a.cmp(b),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.total_cmp(b),
            (ScalarValue::Text(a), ScalarValue::Text(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(true) => write!(f, "TRUE"),
            ScalarValue::Boolean(false) => write!(f, "FALSE"),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Float(fl) => write!(f, "{:?}", fl),
            ScalarValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Integer(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Integer(v as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_string())
    }
}

/// Column reference, qualified by the scan alias (or table name) that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        ColumnRef {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        ColumnRef {
            table: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
    // Arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOperator {
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::And
                | BinaryOperator::Or
                | BinaryOperator::Plus
                | BinaryOperator::Multiply
        )
    }

    pub fn is_associative(&self) -> bool {
        matches!(
            self,
            BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Plus | BinaryOperator::Multiply
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
        )
    }

    /// The operator to use when the operands of a comparison trade places
    pub fn swap(&self) -> Option<BinaryOperator> {
        match self {
            BinaryOperator::Eq => Some(BinaryOperator::Eq),
            BinaryOperator::NotEq => Some(BinaryOperator::NotEq),
            BinaryOperator::Lt => Some(BinaryOperator::Gt),
            BinaryOperator::LtEq => Some(BinaryOperator::GtEq),
            BinaryOperator::Gt => Some(BinaryOperator::Lt),
            BinaryOperator::GtEq => Some(BinaryOperator::LtEq),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
        };
        write!(f, "{}", s)
    }
}

/// Scalar expression.
///
/// Variant order is significant: the derived `Ord` is the structural key the
/// canonicalizer sorts by, which places literals after every other shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Expression {
    Column(ColumnRef),
    Function {
        name: String,
        args: Vec<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    Literal(ScalarValue),
}

impl Expression {
    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            Expression::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expression::Literal(_))
    }

    /// All column references appearing in the expression
    pub fn columns(&self) -> BTreeSet<ColumnRef> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<ColumnRef>) {
        match self {
            Expression::Column(c) => {
                out.insert(c.clone());
            }
            Expression::Literal(_) => {}
            Expression::Function { args, .. } => {
                for arg in args {
                    arg.collect_columns(out);
                }
            }
            Expression::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    /// False if any function call in the expression is non-deterministic or unknown
    pub fn is_deterministic(&self) -> bool {
        match self {
            Expression::Column(_) | Expression::Literal(_) => true,
            Expression::Function { name, args } => {
                function_info(name).is_some_and(|info| info.deterministic)
                    && args.iter().all(|a| a.is_deterministic())
            }
            Expression::BinaryOp { left, right, .. } => {
                left.is_deterministic() && right.is_deterministic()
            }
        }
    }

    /// Top-down replacement: `f` may substitute a node, otherwise children are visited
    pub fn transform<F>(&self, f: &mut F) -> Expression
    where
        F: FnMut(&Expression) -> Option<Expression>,
    {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Expression::Column(_) | Expression::Literal(_) => self.clone(),
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.transform(f)).collect(),
            },
            Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
                left: Box::new(left.transform(f)),
                op: *op,
                right: Box::new(right.transform(f)),
            },
        }
    }

    /// Splits a predicate into its conjuncts, e.g. A AND B AND C becomes [A, B, C]
    pub fn split_conjunction(&self) -> Vec<Expression> {
        let mut conjuncts = Vec::new();
        split_conjunction_recursive(self, &mut conjuncts);
        conjuncts
    }
}

fn split_conjunction_recursive(predicate: &Expression, conjuncts: &mut Vec<Expression>) {
    match predicate {
        Expression::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_conjunction_recursive(left, conjuncts);
            split_conjunction_recursive(right, conjuncts);
        }
        _ => conjuncts.push(predicate.clone()),
    }
}

/// Rebuilds a left-deep conjunction; `None` for an empty list
pub fn conjoin(conjuncts: Vec<Expression>) -> Option<Expression> {
    let mut iter = conjuncts.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| {
        Expression::binary(acc, BinaryOperator::And, next)
    }))
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Column(c) => write!(f, "{}", c),
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::BinaryOp { left, op, right } => write!(f, "({} {} {})", left, op, right),
        }
    }
}

/// Evaluates a binary operator over literals with SQL NULL semantics.
///
/// Returns `None` when the result cannot be computed (type mismatch, integer
/// overflow); callers keep the expression unevaluated in that case.
pub fn eval_binary(op: BinaryOperator, left: &ScalarValue, right: &ScalarValue) -> Option<ScalarValue> {
    use ScalarValue::*;
    match op {
        BinaryOperator::And => match (left, right) {
            (Boolean(false), _) | (_, Boolean(false)) => Some(Boolean(false)),
            (Boolean(true), Boolean(true)) => Some(Boolean(true)),
            (Boolean(_) | Null, Boolean(_) | Null) => Some(Null),
            _ => None,
        },
        BinaryOperator::Or => match (left, right) {
            (Boolean(true), _) | (_, Boolean(true)) => Some(Boolean(true)),
            (Boolean(false), Boolean(false)) => Some(Boolean(false)),
            (Boolean(_) | Null, Boolean(_) | Null) => Some(Null),
            _ => None,
        },
        op if op.is_comparison() => {
            if left.is_null() || right.is_null() {
                return Some(Null);
            }
            let ord = left.compare(right)?;
            let result = match op {
                BinaryOperator::Eq => ord == Ordering::Equal,
                BinaryOperator::NotEq => ord != Ordering::Equal,
                BinaryOperator::Lt => ord == Ordering::Less,
                BinaryOperator::LtEq => ord != Ordering::Greater,
                BinaryOperator::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Some(Boolean(result))
        }
        BinaryOperator::Divide => {
            if left.is_null() || right.is_null() {
                return Some(Null);
            }
            let (l, r) = (left.as_f64()?, right.as_f64()?);
            if r == 0.0 {
                Some(Null)
            } else {
                Some(Float(l / r))
            }
        }
        _ => {
            if left.is_null() || right.is_null() {
                return Some(Null);
            }
            match (left, right) {
                (Integer(a), Integer(b)) => {
                    let v = match op {
                        BinaryOperator::Plus => a.checked_add(*b),
                        BinaryOperator::Minus => a.checked_sub(*b),
                        _ => a.checked_mul(*b),
                    };
                    v.map(Integer)
                }
                (a, b) => {
                    let (x, y) = (a.as_f64()?, b.as_f64()?);
                    let v = match op {
                        BinaryOperator::Plus => x + y,
                        BinaryOperator::Minus => x - y,
                        _ => x * y,
                    };
                    Some(Float(v))
                }
            }
        }
    }
}

type FoldFn = fn(&[ScalarValue]) -> Option<ScalarValue>;

/// Properties of a scalar function known to the planner
pub struct FunctionInfo {
    pub deterministic: bool,
    pub commutative: bool,
    pub associative: bool,
    fold: Option<FoldFn>,
}

impl FunctionInfo {
    /// Evaluates the function over literal arguments
    pub fn evaluate(&self, args: &[ScalarValue]) -> Option<ScalarValue> {
        if !self.deterministic {
            return None;
        }
        self.fold.and_then(|f| f(args))
    }
}

fn fold_abs(args: &[ScalarValue]) -> Option<ScalarValue> {
    match args {
        [ScalarValue::Null] => Some(ScalarValue::Null),
        [ScalarValue::Integer(i)] => i.checked_abs().map(ScalarValue::Integer),
        [ScalarValue::Float(f)] => Some(ScalarValue::Float(f.abs())),
        _ => None,
    }
}

fn fold_upper(args: &[ScalarValue]) -> Option<ScalarValue> {
    match args {
        [ScalarValue::Null] => Some(ScalarValue::Null),
        [ScalarValue::Text(s)] => Some(ScalarValue::Text(s.to_uppercase())),
        _ => None,
    }
}

fn fold_lower(args: &[ScalarValue]) -> Option<ScalarValue> {
    match args {
        [ScalarValue::Null] => Some(ScalarValue::Null),
        [ScalarValue::Text(s)] => Some(ScalarValue::Text(s.to_lowercase())),
        _ => None,
    }
}

fn fold_extreme(args: &[ScalarValue], want: Ordering) -> Option<ScalarValue> {
    let mut best: Option<&ScalarValue> = None;
    for arg in args {
        if arg.is_null() {
            return Some(ScalarValue::Null);
        }
        // ties between equal values of different types go to the lower in the
        // total order, so the result does not depend on argument order
        best = match best {
            None => Some(arg),
            Some(b) => match arg.compare(b)? {
                o if o == want => Some(arg),
                Ordering::Equal if arg < b => Some(arg),
                _ => Some(b),
            },
        };
    }
    best.cloned()
}

fn fold_least(args: &[ScalarValue]) -> Option<ScalarValue> {
    fold_extreme(args, Ordering::Less)
}

fn fold_greatest(args: &[ScalarValue]) -> Option<ScalarValue> {
    fold_extreme(args, Ordering::Greater)
}

fn fold_concat(args: &[ScalarValue]) -> Option<ScalarValue> {
    let mut out = String::new();
    for arg in args {
        match arg {
            ScalarValue::Null => return Some(ScalarValue::Null),
            ScalarValue::Text(s) => out.push_str(s),
            ScalarValue::Integer(i) => out.push_str(&i.to_string()),
            _ => return None,
        }
    }
    Some(ScalarValue::Text(out))
}

fn fold_coalesce(args: &[ScalarValue]) -> Option<ScalarValue> {
    Some(
        args.iter()
            .find(|a| !a.is_null())
            .cloned()
            .unwrap_or(ScalarValue::Null),
    )
}

fn fold_not(args: &[ScalarValue]) -> Option<ScalarValue> {
    match args {
        [ScalarValue::Null] => Some(ScalarValue::Null),
        [ScalarValue::Boolean(b)] => Some(ScalarValue::Boolean(!b)),
        _ => None,
    }
}

// Dates are 'YYYY-MM-DD' text
fn fold_year(args: &[ScalarValue]) -> Option<ScalarValue> {
    match args {
        [ScalarValue::Null] => Some(ScalarValue::Null),
        [ScalarValue::Text(s)] => s.get(..4)?.parse::<i64>().ok().map(ScalarValue::Integer),
        _ => None,
    }
}

static FUNCTIONS: Lazy<HashMap<&'static str, FunctionInfo>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut add = |name, deterministic, commutative, associative, fold: Option<FoldFn>| {
        m.insert(
            name,
            FunctionInfo {
                deterministic,
                commutative,
                associative,
                fold,
            },
        );
    };
    add("abs", true, false, false, Some(fold_abs));
    add("upper", true, false, false, Some(fold_upper));
    add("lower", true, false, false, Some(fold_lower));
    add("least", true, true, true, Some(fold_least));
    add("greatest", true, true, true, Some(fold_greatest));
    add("concat", true, false, true, Some(fold_concat));
    add("coalesce", true, false, true, Some(fold_coalesce));
    add("not", true, false, false, Some(fold_not));
    add("year", true, false, false, Some(fold_year));
    add("random", false, false, false, None);
    add("now", false, false, false, None);
    m
});

/// Looks up a scalar function by (case-insensitive) name
pub fn function_info(name: &str) -> Option<&'static FunctionInfo> {
    FUNCTIONS.get(name.to_ascii_lowercase().as_str())
}

/// Evaluates a known deterministic function over literal arguments
pub fn eval_function(name: &str, args: &[ScalarValue]) -> Option<ScalarValue> {
    function_info(name)?.evaluate(args)
}
