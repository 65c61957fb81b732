//! Operator replay of dead-lettered messages.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetline::adapters::memory::InMemoryStreamLog;
use fleetline::domain::models::{ExecutionRecord, ExecutionStatus};
use fleetline::domain::ports::{ExecutionRepository, StreamLog};
use fleetline::services::{DeadLetterService, ResultHandler};

use common::{consumer, fields, runtime, GROUP};

#[tokio::test]
async fn test_replay_after_fix_processes_message_once() {
    let rt = runtime();
    let log = InMemoryStreamLog::new();
    let handler = Arc::new(ResultHandler::new(
        rt.executions.clone(),
        rt.execution_logs.clone(),
        rt.log_buffer.clone(),
    ));
    let results = consumer(&log, "agent_results", "c1", handler);
    results.ensure_group().await.unwrap();

    let original = log
        .append("agent_results", &fields(&[("execution_id", "42"), ("status", "success"), ("exit_code", "0")]))
        .await
        .unwrap();
    assert_eq!(results.read_and_process().await.unwrap().failed, 1);

    let dlq = DeadLetterService::new(Arc::new(log.clone()));
    let entries = dlq.list("agent_results", 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].origin_id, original);

    // The execution shows up late; the operator replays.
    rt.executions
        .upsert_execution(&ExecutionRecord::new("42", vec![70]).running_since(Utc::now()))
        .await
        .unwrap();
    let receipt = dlq.replay("agent_results", &entries[0].id).await.unwrap().unwrap();
    assert_eq!(receipt.stream, "agent_results");
    assert!(dlq.list("agent_results", 10).await.unwrap().is_empty());

    let batch = results.read_and_process().await.unwrap();
    assert_eq!((batch.read, batch.acked), (1, 1));
    let replayed = log.range("agent_results", 10).await.unwrap();
    assert!(replayed.iter().any(|m| m.id == receipt.new_id && !m.fields.contains_key("error")));

    // The original delivery is still pending; reclaiming it is harmless.
    assert_eq!(log.pending_ids("agent_results", GROUP).await, vec![original]);
    let reclaimed = results.reclaim_pending(Duration::ZERO, 10).await.unwrap();
    assert_eq!(reclaimed.acked, 1);
    assert!(log.pending_ids("agent_results", GROUP).await.is_empty());

    let record = rt.executions.get_execution("42").await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.exit_code, Some(0));
}

#[tokio::test]
async fn test_replay_of_unknown_entry_is_none() {
    let log = InMemoryStreamLog::new();
    let dlq = DeadLetterService::new(Arc::new(log));
    assert!(dlq.replay("agent_results", "1-0").await.unwrap().is_none());
}
