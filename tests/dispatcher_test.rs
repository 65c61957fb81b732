//! The dispatcher wired with the production handler set.

mod common;

use std::time::Duration;

use chrono::Utc;
use fleetline::adapters::memory::InMemoryStreamLog;
use fleetline::cli::commands::consume::stream_configs;
use fleetline::cli::Runtime;
use fleetline::domain::models::{Agent, Config, ExecutionRecord, ExecutionStatus};
use fleetline::domain::ports::{AgentRepository, ExecutionRepository, StreamLog};
use fleetline::services::{DispatcherConfig, StreamDispatcher};

use common::fields;

#[tokio::test]
async fn test_dispatcher_drives_all_streams() {
    let log = InMemoryStreamLog::new();
    let mut rt = Runtime::in_memory(Config::default());
    rt.connector = std::sync::Arc::new(log.clone());

    rt.agents.upsert(&Agent::new(7, 70, "web-7")).await.unwrap();
    rt.executions
        .upsert_execution(&ExecutionRecord::new("42", vec![70]).running_since(Utc::now()))
        .await
        .unwrap();

    let mut streams = rt.config.streams.clone();
    streams.block_ms = 20;
    let configs = stream_configs(&rt, &streams, "it-consumer");
    let handle = StreamDispatcher::new(
        rt.connector.clone(),
        configs,
        DispatcherConfig {
            reclaim_interval: Duration::from_secs(3600),
            error_backoff: Duration::from_millis(10),
        },
    )
    .start()
    .expect("streams configured");

    let now = Utc::now().timestamp_millis().to_string();
    log.append("agent_logs", &fields(&[("execution_id", "42"), ("content", "hello")])).await.unwrap();
    log.append("agent_status", &fields(&[("agent_id", "7"), ("timestamp", &now)])).await.unwrap();
    log.append("agent_task_stats", &fields(&[("agent_id", "7"), ("total", "3")])).await.unwrap();

    let mut acked = 0;
    for _ in 0..200 {
        acked = handle.status().await.streams.values().map(|s| s.acked).sum::<u64>();
        if acked >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(acked, 3);

    log.append("agent_results", &fields(&[("execution_id", "42"), ("status", "success")])).await.unwrap();
    for _ in 0..200 {
        if handle.status().await.streams.get("agent_results").map_or(0, |s| s.acked) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = handle.stop().await;
    assert_eq!(status.streams["agent_results"].acked, 1);
    assert_eq!(status.streams.values().map(|s| s.failed).sum::<u64>(), 0);
    assert_eq!(
        rt.executions.get_execution("42").await.unwrap().unwrap().status,
        ExecutionStatus::Success
    );
    assert!(rt.agents.get(7).await.unwrap().unwrap().last_heartbeat_at.is_some());
}
