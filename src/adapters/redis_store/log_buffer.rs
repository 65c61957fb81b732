//! Redis list implementation of the LogBuffer port.
//!
//! Lines of one execution live in `{prefix}:{execution_id}` as JSON, with
//! the key's expiry refreshed on every append. The connection is opened on
//! first use, so commands that never touch the buffer never need Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::stream_log::RedisStreamLogConnector;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BufferedLogs, LogLine};
use crate::domain::ports::LogBuffer;

#[derive(Clone)]
pub struct RedisLogBuffer {
    connector: RedisStreamLogConnector,
    conn: Arc<OnceCell<ConnectionManager>>,
    key_prefix: String,
    retention: Duration,
}

impl RedisLogBuffer {
    pub fn new(connector: RedisStreamLogConnector, key_prefix: impl Into<String>, retention: Duration) -> Self {
        Self {
            connector,
            conn: Arc::new(OnceCell::new()),
            key_prefix: key_prefix.into(),
            retention,
        }
    }

    pub fn key(&self, execution_id: &str) -> String {
        format!("{}:{execution_id}", self.key_prefix)
    }

    fn retention_secs(&self) -> i64 {
        i64::try_from(self.retention.as_secs()).unwrap_or(i64::MAX).max(1)
    }

    /// Shared connection manager; a failed connect is retried on the next call.
    async fn connection(&self) -> DomainResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| self.connector.connection())
            .await
            .map_err(|e| DomainError::LogBufferError(e.to_string()))?;
        Ok(conn.clone())
    }
}

/// Decode raw list entries, skipping the ones that are not a log line.
fn decode_entries(execution_id: &str, raw: &[String]) -> BufferedLogs {
    let lines = raw
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_str::<LogLine>(entry) {
            Ok(line) => Some(line),
            Err(err) => {
                tracing::warn!(execution_id, index, error = %err, "skipping undecodable buffered log line");
                None
            }
        })
        .collect();
    BufferedLogs {
        lines,
        entries: raw.len(),
    }
}

#[async_trait]
impl LogBuffer for RedisLogBuffer {
    async fn append(&self, line: &LogLine) -> DomainResult<()> {
        let key = self.key(&line.execution_id);
        let payload = serde_json::to_string(line)?;
        let mut conn = self.connection().await?;

        let (): () = redis::pipe()
            .atomic()
            .rpush(&key, payload)
            .ignore()
            .expire(&key, self.retention_secs())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> DomainResult<BufferedLogs> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lrange(self.key(execution_id), 0, -1).await?;
        Ok(decode_entries(execution_id, &raw))
    }

    async fn discard(&self, execution_id: &str, entries: usize) -> DomainResult<()> {
        if entries == 0 {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        // LTRIM keeps whatever was pushed after the snapshot; an emptied list is removed.
        let start = isize::try_from(entries).unwrap_or(isize::MAX);
        let (): () = conn.ltrim(self.key(execution_id), start, -1).await?;
        Ok(())
    }
}
