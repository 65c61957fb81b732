//! Port trait definitions (Hexagonal Architecture)
//!
//! Async interfaces implemented by the adapters:
//! - `StreamLog`: the consumer-group event log
//! - `LogBuffer`: buffered execution log lines
//! - Repositories for agents, executions, logs and task statistics
//! - `StreamHandler`: per-event-type message handlers

pub mod agent_repository;
pub mod execution_log_repository;
pub mod execution_repository;
pub mod log_buffer;
pub mod stream_handler;
pub mod stream_log;
pub mod task_stats_repository;

pub use agent_repository::AgentRepository;
pub use execution_log_repository::ExecutionLogRepository;
pub use execution_repository::ExecutionRepository;
pub use log_buffer::LogBuffer;
pub use stream_handler::StreamHandler;
pub use stream_log::{StreamError, StreamLog, StreamLogConnector, StreamResult};
pub use task_stats_repository::TaskStatsRepository;
