//! Reconciliation convergence against the in-memory and SQLite stores.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use fleetline::adapters::memory::InMemoryAgentRepository;
use fleetline::adapters::sqlite::{
    initialize_test_database, SqliteAgentRepository, SqliteExecutionRepository,
};
use fleetline::domain::models::{
    Agent, ConflictKind, ExecutionRecord, ExecutionStatus, ExecutionStep, LivenessConfig, ReconciliationConfig,
    StepStatus,
};
use fleetline::domain::ports::{AgentRepository, ExecutionRepository};
use fleetline::services::{LivenessService, ReconciliationService};

struct Store {
    agents: Arc<dyn AgentRepository>,
    executions: Arc<dyn ExecutionRepository>,
}

async fn sqlite_store() -> Store {
    let pool = initialize_test_database().await.expect("test database");
    Store {
        agents: Arc::new(SqliteAgentRepository::new(pool.clone())),
        executions: Arc::new(SqliteExecutionRepository::new(pool)),
    }
}

fn memory_store() -> Store {
    let rt = common::runtime();
    Store {
        agents: rt.agents.clone(),
        executions: rt.executions.clone(),
    }
}

fn service(store: &Store) -> ReconciliationService {
    let liveness = Arc::new(LivenessService::new(store.agents.clone(), LivenessConfig::default()));
    ReconciliationService::new(
        store.agents.clone(),
        store.executions.clone(),
        liveness,
        ReconciliationConfig::default(),
    )
}

/// Agent 7 on host 70, one running execution whose steps already finished.
async fn seed(store: &Store, execution_id: &str, step_statuses: &[StepStatus]) {
    store
        .agents
        .upsert(&Agent::new(7, 70, "web-7").with_heartbeat(Utc::now()))
        .await
        .unwrap();
    store
        .executions
        .upsert_execution(&ExecutionRecord::new(execution_id, vec![70]).running_since(Utc::now()))
        .await
        .unwrap();
    for (i, status) in step_statuses.iter().enumerate() {
        let id = i64::try_from(i).unwrap() + 1;
        store
            .executions
            .upsert_step(&ExecutionStep::new(id, execution_id, id, vec![70]).with_status(*status))
            .await
            .unwrap();
    }
}

async fn assert_converges(store: Store, steps: &[StepStatus], expected: ExecutionStatus) {
    seed(&store, "42", steps).await;
    let service = service(&store);

    let report = service.reconcile_agent(7).await.unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].kind, ConflictKind::StuckRunningExecution);
    assert_eq!(report.summary.resolved, 1);

    let record = store.executions.get_execution("42").await.unwrap().unwrap();
    assert_eq!(record.status, expected);
    assert!(record.finished_at.is_some());

    // Already terminal: nothing left to detect or resolve.
    let again = service.reconcile_agent(7).await.unwrap();
    assert!(again.conflicts.is_empty());
    assert_eq!(store.executions.get_execution("42").await.unwrap().unwrap().status, expected);
}

#[tokio::test]
async fn test_all_success_steps_converge_to_success_in_memory() {
    assert_converges(memory_store(), &[StepStatus::Success, StepStatus::Success], ExecutionStatus::Success).await;
}

#[tokio::test]
async fn test_one_failed_step_converges_to_failed_in_memory() {
    assert_converges(
        memory_store(),
        &[StepStatus::Success, StepStatus::Failed, StepStatus::Success],
        ExecutionStatus::Failed,
    )
    .await;
}

#[tokio::test]
async fn test_all_success_steps_converge_to_success_sqlite() {
    assert_converges(sqlite_store().await, &[StepStatus::Success, StepStatus::Success], ExecutionStatus::Success).await;
}

#[tokio::test]
async fn test_one_failed_step_converges_to_failed_sqlite() {
    assert_converges(
        sqlite_store().await,
        &[StepStatus::Failed, StepStatus::Success],
        ExecutionStatus::Failed,
    )
    .await;
}

#[tokio::test]
async fn test_offline_agent_step_is_failed_and_sweep_skips_disabled() {
    let store = sqlite_store().await;
    store
        .agents
        .upsert(&Agent::new(7, 70, "web-7").with_heartbeat(Utc::now() - Duration::hours(2)))
        .await
        .unwrap();
    store
        .agents
        .upsert(&Agent::new(8, 80, "db-8").with_status(fleetline::AgentStatus::Disabled))
        .await
        .unwrap();
    store
        .executions
        .upsert_execution(&ExecutionRecord::new("e-7", vec![70, 80]).running_since(Utc::now()))
        .await
        .unwrap();
    store
        .executions
        .upsert_step(&ExecutionStep::new(1, "e-7", 1, vec![70]).running_since(Utc::now()))
        .await
        .unwrap();

    let sweep = service(&store).reconcile_all().await.unwrap();
    assert_eq!(sweep.agents_checked, 1);
    assert_eq!(sweep.agents_failed, 0);
    assert_eq!(sweep.resolved, 1);

    let step = store.executions.get_step(1).await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.error_message.as_deref(), Some("Agent offline"));
}

#[tokio::test]
async fn test_unknown_agent_is_an_error_not_a_panic() {
    let store = Store {
        agents: Arc::new(InMemoryAgentRepository::new()),
        executions: memory_store().executions,
    };
    assert!(service(&store).reconcile_agent(99).await.is_err());
}
