// Plan Builder
//
// Fluent construction of operator trees and expressions, used by callers
// that assemble plans programmatically and by the scenario loader.

use crate::query::planner::expression::{BinaryOperator, ColumnRef, Expression, ScalarValue};
use crate::query::planner::logical::{AggregateCall, AggregateFunction, JoinKind, OperatorNode, ProjectItem};

/// Builds an `OperatorNode` bottom-up
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    node: OperatorNode,
}

impl PlanBuilder {
    /// Scan of `table` reading `columns`
    pub fn scan(table: &str, columns: &[&str]) -> Self {
        PlanBuilder {
            node: OperatorNode::Scan {
                table: table.to_string(),
                alias: None,
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        }
    }

    /// Scan of `table` whose output columns are qualified by `alias`
    pub fn scan_as(table: &str, alias: &str, columns: &[&str]) -> Self {
        PlanBuilder {
            node: OperatorNode::Scan {
                table: table.to_string(),
                alias: Some(alias.to_string()),
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        }
    }

    pub fn from_node(node: OperatorNode) -> Self {
        PlanBuilder { node }
    }

    pub fn filter(self, predicate: Expression) -> Self {
        PlanBuilder {
            node: OperatorNode::Filter {
                predicate,
                input: Box::new(self.node),
            },
        }
    }

    pub fn project(self, items: Vec<ProjectItem>) -> Self {
        PlanBuilder {
            node: OperatorNode::Project {
                items,
                input: Box::new(self.node),
            },
        }
    }

    /// Projection passing the given columns through unchanged
    pub fn project_columns(self, columns: Vec<Expression>) -> Self {
        let items = columns
            .into_iter()
            .map(|e| match e {
                Expression::Column(c) => ProjectItem::column(c),
                other => {
                    let name = other.to_string();
                    ProjectItem::aliased(other, name)
                }
            })
            .collect();
        self.project(items)
    }

    pub fn aggregate(self, group_by: Vec<Expression>, aggregates: Vec<AggregateCall>) -> Self {
        PlanBuilder {
            node: OperatorNode::Aggregate {
                group_by,
                aggregates,
                input: Box::new(self.node),
            },
        }
    }

    pub fn join(self, right: PlanBuilder, kind: JoinKind, condition: Expression) -> Self {
        PlanBuilder {
            node: OperatorNode::Join {
                left: Box::new(self.node),
                right: Box::new(right.node),
                condition,
                kind,
                commuted: false,
            },
        }
    }

    pub fn inner_join(self, right: PlanBuilder, condition: Expression) -> Self {
        self.join(right, JoinKind::Inner, condition)
    }

    pub fn build(self) -> OperatorNode {
        self.node
    }
}

/// Column reference; `"t.x"` is qualified by `t`, `"x"` is bare
pub fn col(name: &str) -> Expression {
    match name.split_once('.') {
        Some((table, column)) => Expression::Column(ColumnRef::new(table, column)),
        None => Expression::Column(ColumnRef::bare(name)),
    }
}

pub fn qcol(table: &str, name: &str) -> Expression {
    Expression::Column(ColumnRef::new(table, name))
}

pub fn lit(value: impl Into<ScalarValue>) -> Expression {
    Expression::Literal(value.into())
}

pub fn null() -> Expression {
    Expression::Literal(ScalarValue::Null)
}

pub fn func(name: &str, args: Vec<Expression>) -> Expression {
    Expression::Function {
        name: name.to_string(),
        args,
    }
}

macro_rules! binary_helpers {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(left: Expression, right: Expression) -> Expression {
                Expression::binary(left, BinaryOperator::$op, right)
            }
        )*
    };
}

binary_helpers! {
    eq => Eq,
    neq => NotEq,
    lt => Lt,
    lte => LtEq,
    gt => Gt,
    gte => GtEq,
    and => And,
    or => Or,
    plus => Plus,
    minus => Minus,
    mul => Multiply,
    div => Divide,
}

pub fn sum(arg: Expression, alias: &str) -> AggregateCall {
    AggregateCall::new(AggregateFunction::Sum, Some(arg), alias)
}

pub fn count(arg: Expression, alias: &str) -> AggregateCall {
    AggregateCall::new(AggregateFunction::Count, Some(arg), alias)
}

pub fn count_star(alias: &str) -> AggregateCall {
    AggregateCall::new(AggregateFunction::Count, None, alias)
}

pub fn count_distinct(arg: Expression, alias: &str) -> AggregateCall {
    AggregateCall {
        distinct: true,
        ..count(arg, alias)
    }
}

pub fn min(arg: Expression, alias: &str) -> AggregateCall {
    AggregateCall::new(AggregateFunction::Min, Some(arg), alias)
}

pub fn max(arg: Expression, alias: &str) -> AggregateCall {
    AggregateCall::new(AggregateFunction::Max, Some(arg), alias)
}

pub fn avg(arg: Expression, alias: &str) -> AggregateCall {
    AggregateCall::new(AggregateFunction::Avg, Some(arg), alias)
}
