pub mod dead_letter;
pub mod handlers;
pub mod liveness;
pub mod reconciliation;
pub mod stream_consumer;
pub mod stream_dispatcher;

pub use dead_letter::{DeadLetterService, ReplayReceipt};
pub use handlers::{HeartbeatHandler, LogHandler, ResultHandler, TaskStatsHandler};
pub use liveness::{LivenessEntry, LivenessService, LivenessSource};
pub use reconciliation::ReconciliationService;
pub use stream_consumer::{default_consumer_name, StreamConfig, StreamConsumer};
pub use stream_dispatcher::{DispatcherConfig, DispatcherHandle, DispatcherStatus, StreamDispatcher};
