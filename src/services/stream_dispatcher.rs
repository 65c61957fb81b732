//! Runs one consumption loop per stream plus a periodic reclaim task.
//!
//! Loops share nothing but the shutdown signal; each opens its own event
//! log connection so a blocking read on one stream never delays another.
//! Shutdown is observed between read cycles, so in-flight handler calls
//! always complete.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::domain::models::{BatchStats, ReclaimStats};
use crate::domain::ports::StreamLogConnector;
use crate::services::stream_consumer::{StreamConfig, StreamConsumer};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Interval between reclaim passes over every stream.
    pub reclaim_interval: Duration,
    /// Delay before retrying after a transport error.
    pub error_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            reclaim_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Running totals for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StreamStatus {
    pub batches: u64,
    pub read: u64,
    pub acked: u64,
    pub skipped: u64,
    pub failed: u64,
    pub transport_errors: u64,
    pub reclaimed: u64,
    pub reclaim_failed: u64,
}

impl StreamStatus {
    fn record_batch(&mut self, stats: &BatchStats) {
        self.batches += 1;
        self.read += stats.read as u64;
        self.acked += stats.acked as u64;
        self.skipped += stats.skipped as u64;
        self.failed += stats.failed as u64;
    }

    fn record_reclaim(&mut self, stats: &ReclaimStats) {
        self.reclaimed += stats.acked as u64;
        self.reclaim_failed += stats.failed as u64;
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatcherStatus {
    pub streams: BTreeMap<String, StreamStatus>,
    pub reclaim_runs: u64,
}

type SharedStatus = Arc<RwLock<DispatcherStatus>>;

/// Handle to a running dispatcher.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    status: SharedStatus,
}

impl DispatcherHandle {
    /// Ask every loop to stop after its current cycle.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn status(&self) -> DispatcherStatus {
        self.status.read().await.clone()
    }

    /// Wait for every loop to exit.
    pub async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(err) = result {
                tracing::error!(error = %err, "dispatcher task panicked");
            }
        }
    }

    /// Shut down, wait, and return the final totals.
    pub async fn stop(self) -> DispatcherStatus {
        self.shutdown();
        let status = Arc::clone(&self.status);
        self.join().await;
        let totals = status.read().await;
        totals.clone()
    }
}

pub struct StreamDispatcher {
    connector: Arc<dyn StreamLogConnector>,
    streams: Vec<StreamConfig>,
    config: DispatcherConfig,
}

impl StreamDispatcher {
    pub fn new(connector: Arc<dyn StreamLogConnector>, streams: Vec<StreamConfig>, config: DispatcherConfig) -> Self {
        Self {
            connector,
            streams,
            config,
        }
    }

    pub fn streams(&self) -> &[StreamConfig] {
        &self.streams
    }

    /// Spawn the per-stream loops and the reclaim task. Returns `None`
    /// (after a warning) when no stream is configured.
    pub fn start(self) -> Option<DispatcherHandle> {
        if self.streams.is_empty() {
            tracing::warn!("no streams configured; nothing to consume");
            return None;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let status: SharedStatus = Arc::new(RwLock::new(DispatcherStatus {
            streams: self
                .streams
                .iter()
                .map(|s| (s.stream.clone(), StreamStatus::default()))
                .collect(),
            reclaim_runs: 0,
        }));

        let mut tasks = Vec::with_capacity(self.streams.len() + 1);
        for stream in &self.streams {
            tracing::info!(
                stream = %stream.stream,
                group = %stream.group,
                consumer = %stream.consumer,
                handler = stream.handler.name(),
                "starting stream consumer"
            );
            tasks.push(tokio::spawn(run_stream(
                Arc::clone(&self.connector),
                stream.clone(),
                self.config.error_backoff,
                shutdown_rx.clone(),
                Arc::clone(&status),
            )));
        }
        tasks.push(tokio::spawn(run_reclaim(
            Arc::clone(&self.connector),
            self.streams,
            self.config,
            shutdown_rx,
            Arc::clone(&status),
        )));

        Some(DispatcherHandle { shutdown, tasks, status })
    }

    /// Run until `signal` resolves, then shut down cleanly.
    pub async fn run_until<F>(self, signal: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let Some(handle) = self.start() else {
            return;
        };
        signal.await;
        tracing::info!("shutdown requested, waiting for stream loops");
        handle.stop().await;
        tracing::info!("stream dispatcher stopped");
    }
}

/// Sleep for `delay` unless shutdown arrives first. Returns `true` on shutdown.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn run_stream(
    connector: Arc<dyn StreamLogConnector>,
    config: StreamConfig,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
    status: SharedStatus,
) {
    let stream = config.stream.clone();

    let log = loop {
        if *shutdown.borrow() {
            return;
        }
        match connector.connect().await {
            Ok(log) => break log,
            Err(err) => {
                tracing::warn!(stream = %stream, error = %err, "event log connection failed, retrying");
                if sleep_or_shutdown(backoff, &mut shutdown).await {
                    return;
                }
            }
        }
    };
    let consumer = StreamConsumer::new(log, config);

    let mut group_ready = false;
    while !*shutdown.borrow() {
        if !group_ready {
            if let Err(err) = consumer.ensure_group().await {
                tracing::warn!(stream = %stream, error = %err, "ensure group failed, retrying");
                if sleep_or_shutdown(backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
            group_ready = true;
        }

        match consumer.read_and_process().await {
            Ok(stats) => {
                if stats.read > 0 {
                    if let Some(entry) = status.write().await.streams.get_mut(&stream) {
                        entry.record_batch(&stats);
                    }
                }
            }
            Err(err) => {
                tracing::error!(stream = %stream, error = %err, "read cycle failed, backing off");
                if let Some(entry) = status.write().await.streams.get_mut(&stream) {
                    entry.transport_errors += 1;
                }
                // The group may have vanished with the stream; recreate it before reading again.
                group_ready = false;
                if sleep_or_shutdown(backoff, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    tracing::info!(stream = %stream, "stream consumer stopped");
}

async fn run_reclaim(
    connector: Arc<dyn StreamLogConnector>,
    streams: Vec<StreamConfig>,
    config: DispatcherConfig,
    mut shutdown: watch::Receiver<bool>,
    status: SharedStatus,
) {
    let mut ticker = interval(config.reclaim_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first pass waits one interval.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let log = match connector.connect().await {
            Ok(log) => log,
            Err(err) => {
                tracing::warn!(error = %err, "reclaim skipped: event log connection failed");
                continue;
            }
        };

        for stream in &streams {
            if *shutdown.borrow() {
                break;
            }
            let consumer = StreamConsumer::new(Arc::clone(&log), stream.clone());
            match consumer.reclaim_pending(stream.reclaim_idle, stream.reclaim_count).await {
                Ok(stats) => {
                    if stats.checked > 0 {
                        tracing::info!(
                            stream = %stream.stream,
                            checked = stats.checked,
                            claimed = stats.claimed,
                            acked = stats.acked,
                            failed = stats.failed,
                            "reclaimed pending messages"
                        );
                    } else {
                        tracing::debug!(stream = %stream.stream, "no stale pending messages");
                    }
                    if let Some(entry) = status.write().await.streams.get_mut(&stream.stream) {
                        entry.record_reclaim(&stats);
                    }
                }
                Err(err) => {
                    tracing::warn!(stream = %stream.stream, error = %err, "reclaim failed");
                }
            }
        }
        status.write().await.reclaim_runs += 1;
    }

    tracing::info!("reclaim task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStreamLog;
    use crate::domain::errors::DomainResult;
    use crate::domain::models::{HandlerOutcome, StreamMessage};
    use crate::domain::ports::{StreamHandler, StreamLog};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        seen: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl StreamHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _message: &StreamMessage) -> DomainResult<HandlerOutcome> {
            let n = self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Ok(HandlerOutcome::failed("first attempt"));
            }
            Ok(HandlerOutcome::Processed)
        }
    }

    fn one_field(n: usize) -> BTreeMap<String, String> {
        BTreeMap::from([("n".to_string(), n.to_string())])
    }

    fn stream(name: &str, handler: Arc<dyn StreamHandler>) -> StreamConfig {
        StreamConfig::new(name, "g", "c", handler)
            .with_dead_letter(format!("{name}:dlq"))
            .with_batch(10, Duration::from_millis(20))
            .with_reclaim(Duration::ZERO, 50)
    }

    async fn wait_for<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_no_streams_returns_none() {
        let log = InMemoryStreamLog::new();
        let dispatcher = StreamDispatcher::new(Arc::new(log), Vec::new(), DispatcherConfig::default());
        assert!(dispatcher.start().is_none());
    }

    #[tokio::test]
    async fn test_streams_are_consumed_independently() {
        let log = InMemoryStreamLog::new();
        let a = Arc::new(CountingHandler { seen: AtomicUsize::new(0), fail_first: false });
        let b = Arc::new(CountingHandler { seen: AtomicUsize::new(0), fail_first: false });

        let dispatcher = StreamDispatcher::new(
            Arc::new(log.clone()),
            vec![stream("a", a.clone()), stream("b", b.clone())],
            DispatcherConfig::default(),
        );
        let handle = dispatcher.start().unwrap();

        for n in 0..3 {
            log.append("a", &one_field(n)).await.unwrap();
        }
        log.append("b", &one_field(0)).await.unwrap();

        wait_for(|| a.seen.load(Ordering::SeqCst) == 3 && b.seen.load(Ordering::SeqCst) == 1).await;
        handle.stop().await;
        assert!(log.pending_ids("a", "g").await.is_empty());
    }

    #[tokio::test]
    async fn test_loop_recovers_from_transport_errors() {
        let log = InMemoryStreamLog::new();
        log.set_unavailable(true);
        let handler = Arc::new(CountingHandler { seen: AtomicUsize::new(0), fail_first: false });

        let dispatcher = StreamDispatcher::new(
            Arc::new(log.clone()),
            vec![stream("a", handler.clone())],
            DispatcherConfig {
                reclaim_interval: Duration::from_secs(60),
                error_backoff: Duration::from_millis(10),
            },
        );
        let handle = dispatcher.start().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        log.set_unavailable(false);
        log.append("a", &one_field(1)).await.unwrap();

        wait_for(|| handler.seen.load(Ordering::SeqCst) == 1).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_reclaim_task_retries_failed_messages() {
        let log = InMemoryStreamLog::new();
        let handler = Arc::new(CountingHandler { seen: AtomicUsize::new(0), fail_first: true });

        let dispatcher = StreamDispatcher::new(
            Arc::new(log.clone()),
            vec![stream("a", handler.clone())],
            DispatcherConfig {
                reclaim_interval: Duration::from_millis(30),
                error_backoff: Duration::from_millis(10),
            },
        );
        let handle = dispatcher.start().unwrap();
        log.append("a", &one_field(1)).await.unwrap();

        wait_for(|| handler.seen.load(Ordering::SeqCst) >= 2).await;
        let status = handle.status().await;
        handle.stop().await;

        assert!(log.pending_ids("a", "g").await.is_empty());
        assert_eq!(log.len("a:dlq").await, 1);
        assert!(status.streams["a"].failed >= 1);
    }
}
