//! In-process log buffer backed by a moka cache.
//!
//! Each execution's lines expire after `retention` without appends, like the
//! key expiry refreshed by the Redis buffer.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BufferedLogs, LogLine};
use crate::domain::ports::LogBuffer;

const MAX_BUFFERED_EXECUTIONS: u64 = 10_000;

#[derive(Clone)]
pub struct MokaLogBuffer {
    buffers: Cache<String, Arc<Mutex<Vec<LogLine>>>>,
}

impl MokaLogBuffer {
    pub fn new(retention: Duration) -> Self {
        let buffers = Cache::builder()
            .max_capacity(MAX_BUFFERED_EXECUTIONS)
            .time_to_idle(retention)
            .build();
        Self { buffers }
    }
}

#[async_trait]
impl LogBuffer for MokaLogBuffer {
    async fn append(&self, line: &LogLine) -> DomainResult<()> {
        let buffer = self
            .buffers
            .get_with(line.execution_id.clone(), async { Arc::new(Mutex::new(Vec::new())) })
            .await;
        buffer.lock().await.push(line.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> DomainResult<BufferedLogs> {
        let lines = match self.buffers.get(execution_id).await {
            Some(buffer) => buffer.lock().await.clone(),
            None => Vec::new(),
        };
        Ok(BufferedLogs {
            entries: lines.len(),
            lines,
        })
    }

    async fn discard(&self, execution_id: &str, entries: usize) -> DomainResult<()> {
        // The emptied buffer is left to expire; appends may already hold it.
        if let Some(buffer) = self.buffers.get(execution_id).await {
            let mut lines = buffer.lock().await;
            let drained = entries.min(lines.len());
            lines.drain(..drained);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_load_discard() {
        let buffer = MokaLogBuffer::new(Duration::from_secs(60));
        buffer.append(&LogLine::new("1-0", "42", "a")).await.unwrap();
        buffer.append(&LogLine::new("2-0", "42", "b")).await.unwrap();
        buffer.append(&LogLine::new("3-0", "43", "c")).await.unwrap();

        let snapshot = buffer.load("42").await.unwrap();
        assert_eq!(snapshot.entries, 2);
        assert_eq!(snapshot.lines.iter().map(|l| l.content.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        buffer.discard("42", snapshot.entries).await.unwrap();
        assert!(buffer.load("42").await.unwrap().is_empty());
        assert_eq!(buffer.load("43").await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_discard_keeps_lines_appended_after_load() {
        let buffer = MokaLogBuffer::new(Duration::from_secs(60));
        buffer.append(&LogLine::new("1-0", "42", "a")).await.unwrap();
        let snapshot = buffer.load("42").await.unwrap();

        buffer.append(&LogLine::new("2-0", "42", "late")).await.unwrap();
        buffer.discard("42", snapshot.entries).await.unwrap();

        let rest = buffer.load("42").await.unwrap();
        assert_eq!(rest.lines.len(), 1);
        assert_eq!(rest.lines[0].content, "late");
    }
}
