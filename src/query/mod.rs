// Query Processing Module
//
// This module contains the logical plan model and the materialized view
// rewrite pipeline that runs over it.

pub mod planner;
pub mod rewrite;

// Export key public interfaces
pub use rewrite::{rewrite, MvRewriter, RewriteConfig, RewriteResult};
