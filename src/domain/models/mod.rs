//! Domain models.

pub mod agent;
pub mod config;
pub mod conflict;
pub mod execution;
pub mod log_line;
pub mod stream;

pub use agent::{Agent, AgentStatus, AgentTaskStats, AgentType, HeartbeatUpdate};
pub use config::{
    AgentServerConfig, Config, DatabaseConfig, LivenessConfig, LogBufferConfig, LoggingConfig,
    ReconciliationConfig, RedisConfig, StreamsConfig,
};
pub use conflict::{
    AgentReconcileReport, Conflict, ConflictKind, ResolveSummary, Resolution, ResolverOutcome,
    Severity, SweepSummary,
};
pub use execution::{
    ExecutionProgress, ExecutionRecord, ExecutionStatus, ExecutionStep, ExecutionTransition,
    ResultApplication, StepStatus, StepTransition, TaskResult,
};
pub use log_line::{BufferedLogs, LogLine};
pub use stream::{
    dead_letter_key, BatchStats, DeadLetterEntry, HandlerOutcome, PendingEntry, ReclaimStats,
    StreamMessage,
};
