//! Consumer-group client for one stream.
//!
//! A message is acknowledged only after its handler reported `Processed`
//! or `Skipped`. Failures, errors and timeouts copy the message to the
//! dead-letter stream (best effort) and leave it pending for reclaim.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{BatchStats, DeadLetterEntry, HandlerOutcome, ReclaimStats, StreamMessage};
use crate::domain::ports::{StreamHandler, StreamLog, StreamResult};

/// Static configuration of one consumed stream.
#[derive(Clone)]
pub struct StreamConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub handler: Arc<dyn StreamHandler>,
    /// Where failed messages are copied; failures are only logged when unset.
    pub dead_letter_key: Option<String>,
    pub count: usize,
    pub block: Duration,
    pub reclaim_idle: Duration,
    pub reclaim_count: usize,
    pub handler_timeout: Duration,
}

impl StreamConfig {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        handler: Arc<dyn StreamHandler>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            handler,
            dead_letter_key: None,
            count: 100,
            block: Duration::from_millis(1000),
            reclaim_idle: Duration::from_millis(60_000),
            reclaim_count: 50,
            handler_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_dead_letter(mut self, key: impl Into<String>) -> Self {
        self.dead_letter_key = Some(key.into());
        self
    }

    pub fn with_batch(mut self, count: usize, block: Duration) -> Self {
        self.count = count;
        self.block = block;
        self
    }

    pub fn with_reclaim(mut self, idle: Duration, count: usize) -> Self {
        self.reclaim_idle = idle;
        self.reclaim_count = count;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("handler", &self.handler.name())
            .field("dead_letter_key", &self.dead_letter_key)
            .field("count", &self.count)
            .field("block", &self.block)
            .field("reclaim_idle", &self.reclaim_idle)
            .field("reclaim_count", &self.reclaim_count)
            .finish_non_exhaustive()
    }
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Acked,
    Skipped,
    Failed,
}

pub struct StreamConsumer {
    log: Arc<dyn StreamLog>,
    config: StreamConfig,
}

impl StreamConsumer {
    pub fn new(log: Arc<dyn StreamLog>, config: StreamConfig) -> Self {
        Self { log, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn ensure_group(&self) -> StreamResult<()> {
        self.log.ensure_group(&self.config.stream, &self.config.group).await
    }

    /// Read one batch of new messages and handle them in log order.
    ///
    /// Transport errors are returned to the caller; an empty batch is only
    /// ever reported as `read == 0`.
    pub async fn read_and_process(&self) -> StreamResult<BatchStats> {
        let messages = self
            .log
            .read_group(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.count,
                self.config.block,
            )
            .await?;

        let mut stats = BatchStats {
            read: messages.len(),
            ..BatchStats::default()
        };
        for message in &messages {
            match self.process(message, false).await? {
                Disposition::Acked => stats.acked += 1,
                Disposition::Skipped => {
                    stats.acked += 1;
                    stats.skipped += 1;
                }
                Disposition::Failed => stats.failed += 1,
            }
        }

        if stats.read > 0 {
            tracing::debug!(
                stream = %self.config.stream,
                read = stats.read,
                acked = stats.acked,
                skipped = stats.skipped,
                failed = stats.failed,
                "processed batch"
            );
        }
        Ok(stats)
    }

    /// Claim pending entries idle for at least `idle` (up to `max_count`
    /// examined) and run them through the handler again.
    pub async fn reclaim_pending(&self, idle: Duration, max_count: usize) -> StreamResult<ReclaimStats> {
        let mut stats = ReclaimStats::default();
        let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);

        let pending = self
            .log
            .pending(&self.config.stream, &self.config.group, max_count)
            .await?;
        let stale: Vec<String> = pending
            .into_iter()
            .filter(|entry| entry.idle_ms >= idle_ms)
            .map(|entry| entry.id)
            .collect();
        stats.checked = stale.len();
        if stale.is_empty() {
            return Ok(stats);
        }

        let claimed = self
            .log
            .claim(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                idle,
                &stale,
            )
            .await?;
        stats.claimed = claimed.len();

        for message in &claimed {
            match self.process(message, true).await? {
                Disposition::Acked | Disposition::Skipped => stats.acked += 1,
                Disposition::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn process(&self, message: &StreamMessage, reclaimed: bool) -> StreamResult<Disposition> {
        let handler = &self.config.handler;
        let outcome = match tokio::time::timeout(self.config.handler_timeout, handler.handle(message)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => HandlerOutcome::Failed(err.to_string()),
            Err(_) => HandlerOutcome::Failed(format!(
                "handler timed out after {}ms",
                self.config.handler_timeout.as_millis()
            )),
        };

        let acks = outcome.should_ack();
        let disposition = match outcome {
            HandlerOutcome::Processed => Disposition::Acked,
            HandlerOutcome::Skipped(reason) => {
                tracing::warn!(
                    stream = %self.config.stream,
                    message_id = %message.id,
                    handler = handler.name(),
                    reason = %reason,
                    "message skipped"
                );
                Disposition::Skipped
            }
            HandlerOutcome::Failed(reason) => {
                tracing::error!(
                    stream = %self.config.stream,
                    message_id = %message.id,
                    handler = handler.name(),
                    reclaimed,
                    error = %reason,
                    "handler failed, message left pending"
                );
                let reason = if reclaimed { format!("{reason} (reclaim)") } else { reason };
                self.dead_letter(message, &reason).await;
                Disposition::Failed
            }
        };
        if acks {
            self.ack(message).await?;
        }
        Ok(disposition)
    }

    async fn ack(&self, message: &StreamMessage) -> StreamResult<()> {
        self.log
            .ack(&self.config.stream, &self.config.group, std::slice::from_ref(&message.id))
            .await?;
        Ok(())
    }

    /// Copy a failed message to the dead-letter stream. A failed write is
    /// logged; the original stays pending either way.
    async fn dead_letter(&self, message: &StreamMessage, error: &str) {
        let Some(key) = &self.config.dead_letter_key else {
            return;
        };
        let fields = DeadLetterEntry::encode(&self.config.stream, message, error);
        if let Err(err) = self.log.append(key, &fields).await {
            tracing::error!(
                stream = %self.config.stream,
                dead_letter = %key,
                message_id = %message.id,
                error = %err,
                "failed to write dead-letter entry"
            );
        }
    }
}

/// Default consumer identity: `{hostname}-{pid}-{6 hex chars}`.
pub fn default_consumer_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "fleetline".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}-{}", std::process::id(), &suffix[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStreamLog;
    use crate::domain::errors::{DomainError, DomainResult};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then processes.
    struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StreamHandler for FlakyHandler {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, message: &StreamMessage) -> DomainResult<HandlerOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if message.field("poison").is_some() {
                return Err(DomainError::DatabaseError("boom".to_string()));
            }
            if message.field("skip").is_some() {
                return Ok(HandlerOutcome::skipped("missing id"));
            }
            if call < self.failures {
                return Ok(HandlerOutcome::failed("not yet"));
            }
            Ok(HandlerOutcome::Processed)
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl StreamHandler for SlowHandler {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn handle(&self, _message: &StreamMessage) -> DomainResult<HandlerOutcome> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HandlerOutcome::Processed)
        }
    }

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn consumer(log: &InMemoryStreamLog, handler: Arc<dyn StreamHandler>) -> StreamConsumer {
        let config = StreamConfig::new("events", "control-plane", "c1", handler)
            .with_dead_letter("events:dlq")
            .with_batch(10, Duration::ZERO);
        StreamConsumer::new(Arc::new(log.clone()), config)
    }

    #[tokio::test]
    async fn test_processed_messages_are_acked_and_not_dead_lettered() {
        let log = InMemoryStreamLog::new();
        let c = consumer(&log, Arc::new(FlakyHandler { failures: 0, calls: AtomicUsize::new(0) }));
        c.ensure_group().await.unwrap();
        log.append("events", &fields(&[("n", "1")])).await.unwrap();

        let stats = c.read_and_process().await.unwrap();
        assert_eq!(stats, BatchStats { read: 1, acked: 1, skipped: 0, failed: 0 });
        assert!(log.pending_ids("events", "control-plane").await.is_empty());
        assert_eq!(log.len("events:dlq").await, 0);
    }

    #[tokio::test]
    async fn test_failed_messages_are_dead_lettered_and_stay_pending() {
        let log = InMemoryStreamLog::new();
        let c = consumer(&log, Arc::new(FlakyHandler { failures: 0, calls: AtomicUsize::new(0) }));
        c.ensure_group().await.unwrap();
        let id = log.append("events", &fields(&[("poison", "1")])).await.unwrap();

        let stats = c.read_and_process().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(log.pending_ids("events", "control-plane").await, vec![id.clone()]);

        let dlq = log.range("events:dlq", 10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        let entry = DeadLetterEntry::decode(dlq[0].clone());
        assert_eq!(entry.origin_id, id);
        assert_eq!(entry.origin_stream, "events");
        assert!(entry.error.contains("boom"));
    }

    #[tokio::test]
    async fn test_skipped_messages_are_acked_without_dead_letter() {
        let log = InMemoryStreamLog::new();
        let c = consumer(&log, Arc::new(FlakyHandler { failures: 0, calls: AtomicUsize::new(0) }));
        c.ensure_group().await.unwrap();
        log.append("events", &fields(&[("skip", "1")])).await.unwrap();

        let stats = c.read_and_process().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(log.pending_ids("events", "control-plane").await.is_empty());
        assert_eq!(log.len("events:dlq").await, 0);
    }

    #[tokio::test]
    async fn test_reclaim_retries_failed_messages() {
        let log = InMemoryStreamLog::new();
        let c = consumer(&log, Arc::new(FlakyHandler { failures: 1, calls: AtomicUsize::new(0) }));
        c.ensure_group().await.unwrap();
        log.append("events", &fields(&[("n", "1")])).await.unwrap();

        c.read_and_process().await.unwrap();
        assert_eq!(log.pending_ids("events", "control-plane").await.len(), 1);

        let stats = c.reclaim_pending(Duration::ZERO, 50).await.unwrap();
        assert_eq!(stats, ReclaimStats { checked: 1, claimed: 1, acked: 1, failed: 0 });
        assert!(log.pending_ids("events", "control-plane").await.is_empty());
    }

    #[tokio::test]
    async fn test_reclaim_skips_entries_below_idle_threshold() {
        let log = InMemoryStreamLog::new();
        let c = consumer(&log, Arc::new(FlakyHandler { failures: 1, calls: AtomicUsize::new(0) }));
        c.ensure_group().await.unwrap();
        log.append("events", &fields(&[("n", "1")])).await.unwrap();
        c.read_and_process().await.unwrap();

        let stats = c.reclaim_pending(Duration::from_secs(60), 50).await.unwrap();
        assert_eq!(stats, ReclaimStats::default());
    }

    #[tokio::test]
    async fn test_handler_timeout_is_a_failure() {
        let log = InMemoryStreamLog::new();
        let config = StreamConfig::new("events", "g", "c1", Arc::new(SlowHandler))
            .with_dead_letter("events:dlq")
            .with_batch(10, Duration::ZERO)
            .with_handler_timeout(Duration::from_millis(20));
        let c = StreamConsumer::new(Arc::new(log.clone()), config);
        c.ensure_group().await.unwrap();
        log.append("events", &fields(&[("n", "1")])).await.unwrap();

        let stats = c.read_and_process().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(log.len("events:dlq").await, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_write_failure_keeps_message_pending() {
        let log = InMemoryStreamLog::new();
        let c = consumer(&log, Arc::new(FlakyHandler { failures: 0, calls: AtomicUsize::new(0) }));
        c.ensure_group().await.unwrap();
        log.append("events", &fields(&[("poison", "1")])).await.unwrap();
        log.set_reject_appends(true);

        let stats = c.read_and_process().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(log.pending_ids("events", "control-plane").await.len(), 1);
        assert_eq!(log.len("events:dlq").await, 0);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let log = InMemoryStreamLog::new();
        let c = consumer(&log, Arc::new(FlakyHandler { failures: 0, calls: AtomicUsize::new(0) }));
        c.ensure_group().await.unwrap();
        log.set_unavailable(true);
        assert!(c.read_and_process().await.is_err());
    }

    #[test]
    fn test_default_consumer_name_shape() {
        let name = default_consumer_name();
        let parts: Vec<&str> = name.rsplitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 6);
        assert_eq!(parts[1], std::process::id().to_string());
    }
}
