//! CLI command implementations.

pub mod agent;
pub mod consume;
pub mod dlq;
pub mod reconcile;
