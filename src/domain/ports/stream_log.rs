//! Event log port.
//!
//! Models the consumer-group contract of an append-only log: named groups,
//! per-consumer delivery, acknowledgement and a reclaimable pending set.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::{PendingEntry, StreamMessage};

#[derive(Debug, Error)]
pub enum StreamError {
    /// The log is unreachable or timed out. Callers back off and retry.
    #[error("Event log transport error: {0}")]
    Transport(String),

    /// The log answered with something unexpected.
    #[error("Event log protocol error: {0}")]
    Protocol(String),
}

pub type StreamResult<T> = Result<T, StreamError>;

#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Create `group` on `stream` (creating the stream if needed). Succeeds
    /// when the group already exists.
    async fn ensure_group(&self, stream: &str, group: &str) -> StreamResult<()>;

    /// Read up to `count` never-delivered messages for `consumer`, waiting up
    /// to `block` for the first one. An empty vector means nothing arrived.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StreamResult<Vec<StreamMessage>>;

    /// Acknowledge messages, removing them from the pending set.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> StreamResult<u64>;

    /// Up to `count` pending entries of the group, oldest first.
    async fn pending(&self, stream: &str, group: &str, count: usize) -> StreamResult<Vec<PendingEntry>>;

    /// Take ownership of pending entries idle for at least `min_idle`.
    /// Entries that were acknowledged or deleted meanwhile are not returned.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> StreamResult<Vec<StreamMessage>>;

    /// Append a message; returns its id.
    async fn append(&self, stream: &str, fields: &BTreeMap<String, String>) -> StreamResult<String>;

    /// Up to `count` messages from the start of the stream.
    async fn range(&self, stream: &str, count: usize) -> StreamResult<Vec<StreamMessage>>;

    /// One message by exact id; `None` when it does not exist.
    async fn get(&self, stream: &str, id: &str) -> StreamResult<Option<StreamMessage>>;

    /// Delete messages by id.
    async fn delete(&self, stream: &str, ids: &[String]) -> StreamResult<u64>;
}

/// Opens event log connections. Each consumption loop gets its own so
/// blocking reads on one stream never wait behind another.
#[async_trait]
pub trait StreamLogConnector: Send + Sync {
    async fn connect(&self) -> StreamResult<Arc<dyn StreamLog>>;
}
