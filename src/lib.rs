//! Fleetline - control-plane telemetry for remote agent fleets
//!
//! Fleetline consumes agent telemetry from Redis Streams consumer groups,
//! keeps agent liveness current, and reconciles execution records with the
//! evidence agents report.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, errors and port traits
//! - **Adapters** (`adapters`): Redis, SQLite and in-memory port implementations
//! - **Service Layer** (`services`): Stream consumption, handlers, liveness, reconciliation
//! - **Infrastructure Layer** (`infrastructure`): Configuration, logging, Agent-Server client
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use fleetline::cli::Runtime;
//! use fleetline::domain::models::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Runtime::build(Config::default(), true).await?;
//!     let report = runtime.reconciliation().reconcile_agent(7).await?;
//!     println!("{} conflict(s)", report.conflicts.len());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Agent, AgentStatus, Config, Conflict, ConflictKind, ExecutionRecord, ExecutionStatus, ExecutionStep,
    HandlerOutcome, StepStatus, StreamMessage,
};
pub use domain::ports::{
    AgentRepository, ExecutionRepository, LogBuffer, StreamHandler, StreamLog, StreamLogConnector,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{LivenessService, ReconciliationService, StreamConsumer, StreamDispatcher};
