//! Short-lived buffer for log lines awaiting their closing result.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BufferedLogs, LogLine};

#[async_trait]
pub trait LogBuffer: Send + Sync {
    /// Append a line to the execution's buffer and refresh its retention.
    async fn append(&self, line: &LogLine) -> DomainResult<()>;

    /// Snapshot of the execution's buffer, oldest first. Entries that cannot
    /// be decoded are counted but not returned.
    async fn load(&self, execution_id: &str) -> DomainResult<BufferedLogs>;

    /// Drop the oldest `entries` entries. Lines appended after the snapshot
    /// was loaded are kept.
    async fn discard(&self, execution_id: &str, entries: usize) -> DomainResult<()>;
}
