//! Durable execution log storage port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::LogLine;

#[async_trait]
pub trait ExecutionLogRepository: Send + Sync {
    /// Insert lines, ignoring any whose message id is already stored.
    /// Returns the number of rows actually inserted.
    async fn insert_batch(&self, lines: &[LogLine]) -> DomainResult<u64>;

    /// Lines of an execution in insertion order.
    async fn list_for_execution(&self, execution_id: &str) -> DomainResult<Vec<LogLine>>;
}
