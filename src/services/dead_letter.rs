//! Operator inspection and manual replay of dead-letter logs.
//!
//! Nothing here runs automatically; replay is always an explicit action.

use std::sync::Arc;

use crate::domain::models::{dead_letter_key, DeadLetterEntry};
use crate::domain::ports::{StreamLog, StreamResult};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReplayReceipt {
    pub dead_letter_id: String,
    pub stream: String,
    /// Id of the re-appended message in the origin stream.
    pub new_id: String,
}

pub struct DeadLetterService {
    log: Arc<dyn StreamLog>,
}

impl DeadLetterService {
    pub fn new(log: Arc<dyn StreamLog>) -> Self {
        Self { log }
    }

    /// Oldest-first dead letters recorded for `stream`.
    pub async fn list(&self, stream: &str, limit: usize) -> StreamResult<Vec<DeadLetterEntry>> {
        let messages = self.log.range(&dead_letter_key(stream), limit).await?;
        Ok(messages.into_iter().map(DeadLetterEntry::decode).collect())
    }

    /// Re-append the original fields of one dead letter to its origin stream
    /// and delete it. `None` when no such entry exists.
    pub async fn replay(&self, stream: &str, entry_id: &str) -> StreamResult<Option<ReplayReceipt>> {
        let dlq = dead_letter_key(stream);
        let Some(entry) = self.log.get(&dlq, entry_id).await?.map(DeadLetterEntry::decode) else {
            return Ok(None);
        };

        let target = if entry.origin_stream.is_empty() {
            stream.to_string()
        } else {
            entry.origin_stream.clone()
        };
        let new_id = self.log.append(&target, &entry.fields).await?;
        self.log.delete(&dlq, &[entry.id.clone()]).await?;

        tracing::info!(
            stream = %target,
            dead_letter_id = %entry.id,
            origin_id = %entry.origin_id,
            new_id = %new_id,
            "replayed dead letter"
        );
        Ok(Some(ReplayReceipt {
            dead_letter_id: entry.id,
            stream: target,
            new_id,
        }))
    }
}
