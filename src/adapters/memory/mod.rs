//! In-process adapters used by tests and `--in-memory` runs.

pub mod log_buffer;
pub mod repositories;
pub mod stream_log;

pub use log_buffer::MokaLogBuffer;
pub use repositories::{
    InMemoryAgentRepository, InMemoryExecutionLogRepository, InMemoryExecutionRepository,
    InMemoryTaskStatsRepository,
};
pub use stream_log::InMemoryStreamLog;
