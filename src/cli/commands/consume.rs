//! Long-running stream consumer.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::{dead_letter_key, StreamsConfig};
use crate::domain::ports::StreamHandler;
use crate::services::stream_dispatcher::DispatcherStatus;
use crate::services::{
    default_consumer_name, DispatcherConfig, HeartbeatHandler, LogHandler, ResultHandler, StreamConfig,
    StreamDispatcher, TaskStatsHandler,
};

#[derive(Args, Debug, Default)]
pub struct ConsumeArgs {
    /// Consumer identity within the group
    #[arg(long)]
    pub consumer_name: Option<String>,

    /// Consumer group name
    #[arg(long)]
    pub group: Option<String>,

    /// Log stream key (empty disables)
    #[arg(long)]
    pub logs_stream: Option<String>,

    /// Result stream key (empty disables)
    #[arg(long)]
    pub results_stream: Option<String>,

    /// Heartbeat stream key (empty disables)
    #[arg(long)]
    pub status_stream: Option<String>,

    /// Task statistics stream key (empty disables)
    #[arg(long)]
    pub task_stats_stream: Option<String>,

    /// Messages per read
    #[arg(long)]
    pub count: Option<usize>,

    /// Milliseconds a read blocks
    #[arg(long)]
    pub block_ms: Option<u64>,

    #[arg(long)]
    pub reclaim_interval_secs: Option<u64>,

    /// Idle time before a pending message is reclaimed
    #[arg(long)]
    pub reclaim_idle_ms: Option<u64>,

    #[arg(long)]
    pub reclaim_count: Option<usize>,

    /// Do not copy failed messages to `{stream}:dlq`
    #[arg(long)]
    pub no_dead_letter: bool,
}

impl ConsumeArgs {
    fn apply(&self, streams: &mut StreamsConfig) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        if self.consumer_name.is_some() {
            streams.consumer_name.clone_from(&self.consumer_name);
        }
        set(&mut streams.group, self.group.as_ref());
        set(&mut streams.logs, self.logs_stream.as_ref());
        set(&mut streams.results, self.results_stream.as_ref());
        set(&mut streams.status, self.status_stream.as_ref());
        set(&mut streams.task_stats, self.task_stats_stream.as_ref());
        set(&mut streams.count, self.count.as_ref());
        set(&mut streams.block_ms, self.block_ms.as_ref());
        set(&mut streams.reclaim_interval_secs, self.reclaim_interval_secs.as_ref());
        set(&mut streams.reclaim_idle_ms, self.reclaim_idle_ms.as_ref());
        set(&mut streams.reclaim_count, self.reclaim_count.as_ref());
        if self.no_dead_letter {
            streams.dead_letter = false;
        }
    }
}

/// One consumer per non-empty stream key, each bound to its handler.
pub fn stream_configs(runtime: &Runtime, streams: &StreamsConfig, consumer: &str) -> Vec<StreamConfig> {
    let handlers: [(&str, Arc<dyn StreamHandler>); 4] = [
        (&streams.logs, Arc::new(LogHandler::new(runtime.log_buffer.clone()))),
        (
            &streams.results,
            Arc::new(ResultHandler::new(
                runtime.executions.clone(),
                runtime.execution_logs.clone(),
                runtime.log_buffer.clone(),
            )),
        ),
        (
            &streams.status,
            Arc::new(HeartbeatHandler::new(runtime.agents.clone(), runtime.liveness.clone())),
        ),
        (&streams.task_stats, Arc::new(TaskStatsHandler::new(runtime.task_stats.clone()))),
    ];

    handlers
        .into_iter()
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, handler)| {
            let config = StreamConfig::new(key, &streams.group, consumer, handler)
                .with_batch(streams.count, Duration::from_millis(streams.block_ms))
                .with_reclaim(Duration::from_millis(streams.reclaim_idle_ms), streams.reclaim_count)
                .with_handler_timeout(Duration::from_secs(streams.handler_timeout_secs));
            if streams.dead_letter {
                config.with_dead_letter(dead_letter_key(key))
            } else {
                config
            }
        })
        .collect()
}

#[derive(Debug, serde::Serialize)]
pub struct ConsumeOutput {
    pub consumer: String,
    pub started: bool,
    pub status: DispatcherStatus,
}

impl CommandOutput for ConsumeOutput {
    fn to_human(&self) -> String {
        if !self.started {
            return "No streams configured; nothing to consume.".to_string();
        }

        let mut lines = vec![format!("Consumer {} stopped.\n", self.consumer)];
        lines.push(format!(
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>10} {:>10}",
            "STREAM", "READ", "ACKED", "SKIPPED", "FAILED", "RECLAIMED", "TRANSPORT"
        ));
        lines.push("-".repeat(82));
        for (stream, totals) in &self.status.streams {
            lines.push(format!(
                "{:<24} {:>8} {:>8} {:>8} {:>8} {:>10} {:>10}",
                stream, totals.read, totals.acked, totals.skipped, totals.failed, totals.reclaimed, totals.transport_errors
            ));
        }
        lines.push(format!("\nReclaim passes: {}", self.status.reclaim_runs));
        lines.join("\n")
    }
}

pub async fn execute(args: ConsumeArgs, runtime: Runtime, json_mode: bool) -> Result<()> {
    let mut streams = runtime.config.streams.clone();
    args.apply(&mut streams);

    let consumer = streams
        .consumer_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(default_consumer_name);

    let dispatcher = StreamDispatcher::new(
        runtime.connector.clone(),
        stream_configs(&runtime, &streams, &consumer),
        DispatcherConfig {
            reclaim_interval: Duration::from_secs(streams.reclaim_interval_secs),
            error_backoff: Duration::from_millis(streams.error_backoff_ms),
        },
    );

    let Some(handle) = dispatcher.start() else {
        output(
            &ConsumeOutput {
                consumer,
                started: false,
                status: DispatcherStatus::default(),
            },
            json_mode,
        );
        return Ok(());
    };

    tracing::info!(consumer = %consumer, group = %streams.group, "consumer running; press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C");
    tracing::info!("shutdown requested, waiting for stream loops");
    let status = handle.stop().await;
    signal?;

    output(
        &ConsumeOutput {
            consumer,
            started: true,
            status,
        },
        json_mode,
    );
    Ok(())
}
