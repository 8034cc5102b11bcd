// Query Planner Module
//
// This module holds the logical plan model shared by queries and materialized
// view definitions: expressions, operator trees, a fluent builder and the
// cost model used to rank rewrite candidates.

pub mod expression;
pub mod logical;
pub mod builder;
pub mod cost_model;

// Export key types
pub use self::builder::PlanBuilder;
pub use self::cost_model::{HeuristicStatistics, Statistics};
pub use self::expression::{BinaryOperator, ColumnRef, Expression, ScalarValue};
pub use self::logical::{AggregateCall, AggregateFunction, JoinKind, NodePath, OperatorNode, ProjectItem};
