//! Reconciliation engine.
//!
//! Audits execution and step state against the evidence available to the
//! control plane (step outcomes, timeouts, agent liveness) and repairs
//! drift that stream handlers cannot see. Every repair is a conditional
//! transition out of `running`, so running a resolver twice is a no-op.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Agent, AgentReconcileReport, AgentStatus, Conflict, ConflictKind, ExecutionRecord, ExecutionStatus,
    ExecutionStep, ExecutionTransition, ReconciliationConfig, ResolveSummary, Resolution, ResolverOutcome,
    StepStatus, StepTransition, SweepSummary,
};
use crate::domain::ports::{AgentRepository, ExecutionRepository};
use crate::services::liveness::LivenessService;

pub const AGENT_OFFLINE_REASON: &str = "Agent offline";

pub struct ReconciliationService {
    agents: Arc<dyn AgentRepository>,
    executions: Arc<dyn ExecutionRepository>,
    liveness: Arc<LivenessService>,
    config: ReconciliationConfig,
}

impl ReconciliationService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        executions: Arc<dyn ExecutionRepository>,
        liveness: Arc<LivenessService>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            agents,
            executions,
            liveness,
            config,
        }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    fn conflict_window(&self) -> TimeDelta {
        TimeDelta::hours(self.config.conflict_window_hours)
    }

    fn execution_timeout(&self, record: &ExecutionRecord) -> i64 {
        record.timeout_secs.unwrap_or(self.config.execution_timeout_secs)
    }

    fn step_timeout(&self, step: &ExecutionStep) -> i64 {
        step.timeout_secs.unwrap_or(self.config.step_timeout_secs)
    }

    /// Detect conflicts scoped to one agent without resolving them.
    pub async fn detect_agent_conflicts(&self, agent_id: i64) -> DomainResult<Vec<Conflict>> {
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or(DomainError::AgentNotFound(agent_id))?;
        let now = Utc::now();
        let since = now - self.conflict_window();

        let mut conflicts = self.detect_execution_conflicts(&agent, since, now).await?;
        conflicts.extend(self.detect_step_conflicts(&agent, since, now).await?);
        Ok(conflicts)
    }

    async fn detect_execution_conflicts(
        &self,
        agent: &Agent,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Conflict>> {
        let mut conflicts = Vec::new();
        for record in self
            .executions
            .get_running_executions_for_agent(agent.host_id, since)
            .await?
        {
            let timeout = self.execution_timeout(&record);
            let started = record.started_at.unwrap_or(record.created_at);
            if now - started > TimeDelta::seconds(timeout) {
                conflicts.push(
                    Conflict::new(
                        ConflictKind::ExecutionTimeout,
                        Resolution::FailExecutionTimeout,
                        format!("Execution timed out after {timeout}s"),
                    )
                    .for_agent(agent.id, agent.host_id)
                    .for_execution(&record.execution_id),
                );
                continue;
            }

            let steps = self.executions.list_steps(&record.execution_id).await?;
            if !steps.is_empty() && steps.iter().all(|s| s.status.is_terminal()) {
                conflicts.push(
                    Conflict::new(
                        ConflictKind::StuckRunningExecution,
                        Resolution::PromoteFromSteps,
                        format!("Execution running but all {} steps are terminal", steps.len()),
                    )
                    .for_agent(agent.id, agent.host_id)
                    .for_execution(&record.execution_id),
                );
            }
        }
        Ok(conflicts)
    }

    async fn detect_step_conflicts(
        &self,
        agent: &Agent,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Conflict>> {
        let agent_offline = self.liveness.evaluate(agent, now) == AgentStatus::Offline;
        let mut conflicts = Vec::new();

        for step in self
            .executions
            .get_running_steps_for_agent(agent.host_id, since)
            .await?
        {
            let timeout = self.step_timeout(&step);
            let started = step.started_at.unwrap_or(step.created_at);
            let conflict = if now - started > TimeDelta::seconds(timeout) {
                Conflict::new(
                    ConflictKind::StepTimeout,
                    Resolution::FailStepTimeout,
                    format!("Step timed out after {timeout}s"),
                )
            } else if agent_offline {
                Conflict::new(
                    ConflictKind::StepAgentOffline,
                    Resolution::FailStepAgentOffline,
                    AGENT_OFFLINE_REASON,
                )
            } else {
                continue;
            };
            conflicts.push(
                conflict
                    .for_agent(agent.id, agent.host_id)
                    .for_execution(&step.execution_id)
                    .for_step(step.id),
            );
        }
        Ok(conflicts)
    }

    /// Apply the repair named by the conflict's resolution.
    pub async fn resolve(&self, conflict: &Conflict) -> DomainResult<ResolverOutcome> {
        match conflict.resolution {
            Resolution::PromoteFromSteps => self.promote_from_steps(conflict).await,
            Resolution::FailExecutionTimeout => {
                let execution_id = required_execution(conflict)?;
                self.fail_execution(execution_id, &conflict.reason).await
            }
            Resolution::FailStepTimeout | Resolution::FailStepAgentOffline => {
                let step_id = conflict.step_id.ok_or_else(|| {
                    DomainError::ValidationFailed(format!("{} conflict without step id", conflict.kind))
                })?;
                let transition = StepTransition {
                    step_id,
                    to: StepStatus::Failed,
                    error_message: Some(conflict.reason.clone()),
                    finished_at: Utc::now(),
                };
                Ok(outcome(self.executions.transition_step(&transition).await?))
            }
            Resolution::ReportOnly => Ok(ResolverOutcome::Unresolvable(format!(
                "{} is reported for operator review",
                conflict.kind
            ))),
        }
    }

    async fn promote_from_steps(&self, conflict: &Conflict) -> DomainResult<ResolverOutcome> {
        let execution_id = required_execution(conflict)?;
        let steps = self.executions.list_steps(execution_id).await?;
        if steps.is_empty() || steps.iter().any(|s| !s.status.is_terminal()) {
            return Ok(ResolverOutcome::NoOp);
        }

        let failed = steps.iter().filter(|s| s.status == StepStatus::Failed).count();
        let (to, error_message) = if failed > 0 {
            (ExecutionStatus::Failed, Some(format!("{failed} step(s) failed")))
        } else if steps.iter().all(|s| s.status == StepStatus::Success) {
            (ExecutionStatus::Success, None)
        } else {
            return Ok(ResolverOutcome::Unresolvable(
                "terminal steps include cancelled or skipped without failures".to_string(),
            ));
        };

        let transition = ExecutionTransition {
            execution_id: execution_id.to_string(),
            to,
            error_message,
            finished_at: Utc::now(),
        };
        Ok(outcome(self.executions.transition_execution(&transition).await?))
    }

    async fn fail_execution(&self, execution_id: &str, reason: &str) -> DomainResult<ResolverOutcome> {
        let transition = ExecutionTransition {
            execution_id: execution_id.to_string(),
            to: ExecutionStatus::Failed,
            error_message: Some(reason.to_string()),
            finished_at: Utc::now(),
        };
        Ok(outcome(self.executions.transition_execution(&transition).await?))
    }

    /// Resolve up to the per-run cap; the rest is deferred to the next sweep.
    pub async fn resolve_conflicts(&self, conflicts: &[Conflict]) -> ResolveSummary {
        let cap = self.config.max_conflicts_per_run.min(conflicts.len());
        let mut summary = ResolveSummary {
            total: conflicts.len(),
            deferred: conflicts.len() - cap,
            ..ResolveSummary::default()
        };

        for conflict in &conflicts[..cap] {
            match self.resolve(conflict).await {
                Ok(ResolverOutcome::Resolved) => {
                    summary.resolved += 1;
                    tracing::info!(
                        kind = %conflict.kind,
                        execution_id = ?conflict.execution_id,
                        step_id = ?conflict.step_id,
                        "conflict resolved"
                    );
                }
                Ok(ResolverOutcome::NoOp) => summary.noop += 1,
                Ok(ResolverOutcome::Unresolvable(why)) => {
                    summary.unresolvable += 1;
                    tracing::warn!(kind = %conflict.kind, execution_id = ?conflict.execution_id, reason = %why, "conflict left unresolved");
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(kind = %conflict.kind, execution_id = ?conflict.execution_id, error = %err, "conflict resolution failed");
                }
            }
        }

        if summary.deferred > 0 {
            tracing::warn!(deferred = summary.deferred, cap, "conflict cap reached, deferring the rest");
        }
        summary
    }

    pub async fn reconcile_agent(&self, agent_id: i64) -> DomainResult<AgentReconcileReport> {
        let conflicts = self.detect_agent_conflicts(agent_id).await?;
        let summary = self.resolve_conflicts(&conflicts).await;
        if !conflicts.is_empty() {
            tracing::info!(
                agent_id,
                found = conflicts.len(),
                resolved = summary.resolved,
                failed = summary.failed,
                "reconciled agent"
            );
        }
        Ok(AgentReconcileReport {
            agent_id,
            conflicts,
            summary,
        })
    }

    /// Reconcile every non-disabled agent; one agent's failure does not stop the sweep.
    pub async fn reconcile_all(&self) -> DomainResult<SweepSummary> {
        let agents = self.agents.list(Some(AgentStatus::Disabled)).await?;
        let mut sweep = SweepSummary::default();

        for agent in agents {
            match self.reconcile_agent(agent.id).await {
                Ok(report) => sweep.absorb(&report),
                Err(err) => {
                    sweep.agents_failed += 1;
                    sweep.errors.push(format!("agent {}: {err}", agent.id));
                    tracing::error!(agent_id = agent.id, error = %err, "agent reconciliation failed");
                }
            }
        }

        tracing::info!(
            agents = sweep.agents_checked,
            failed_agents = sweep.agents_failed,
            conflicts = sweep.conflicts_found,
            resolved = sweep.resolved,
            "reconciliation sweep finished"
        );
        Ok(sweep)
    }

    /// Read-only sweep for drift older than `window`. Most severe first.
    pub async fn detect_global_anomalies(&self, window: TimeDelta) -> DomainResult<Vec<Conflict>> {
        let now = Utc::now();
        let cutoff = now - window;
        let mut conflicts = Vec::new();

        for record in self.executions.find_long_running_executions(cutoff).await? {
            conflicts.push(
                Conflict::new(
                    ConflictKind::LongRunningExecution,
                    Resolution::ReportOnly,
                    format!("Execution running for more than {}h", window.num_hours()),
                )
                .for_execution(record.execution_id),
            );
        }

        for step in self.executions.find_stale_steps(cutoff).await? {
            conflicts.push(
                Conflict::new(
                    ConflictKind::InconsistentStep,
                    Resolution::ReportOnly,
                    format!("Step {} for more than {}h", step.status, window.num_hours()),
                )
                .for_execution(step.execution_id)
                .for_step(step.id),
            );
        }

        for agent in self.agents.list(Some(AgentStatus::Disabled)).await? {
            if self.liveness.evaluate(&agent, now) != AgentStatus::Offline {
                continue;
            }
            let active = self.executions.count_active_steps_for_host(agent.host_id).await?;
            if active > 0 {
                conflicts.push(
                    Conflict::new(
                        ConflictKind::OfflineAgentActiveSteps,
                        Resolution::ReportOnly,
                        format!("Agent offline with {active} active step(s)"),
                    )
                    .for_agent(agent.id, agent.host_id),
                );
            }
        }

        conflicts.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(conflicts)
    }

    /// One scheduled pass: global anomaly report followed by a full sweep.
    pub async fn run_once(&self) -> DomainResult<(Vec<Conflict>, SweepSummary)> {
        let anomalies = self.detect_global_anomalies(self.conflict_window()).await?;
        if !anomalies.is_empty() {
            tracing::warn!(count = anomalies.len(), "global anomalies detected");
        }
        let sweep = self.reconcile_all().await?;
        Ok((anomalies, sweep))
    }

    /// Run [`Self::run_once`] every `every` until shutdown. Returns the number of passes.
    pub async fn run_scheduled(&self, every: Duration, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0;

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

            runs += 1;
            if let Err(err) = self.run_once().await {
                tracing::error!(run = runs, error = %err, "scheduled reconciliation failed");
            }
        }

        tracing::info!(runs, "scheduled reconciliation stopped");
        runs
    }
}

fn required_execution(conflict: &Conflict) -> DomainResult<&str> {
    conflict.execution_id.as_deref().ok_or_else(|| {
        DomainError::ValidationFailed(format!("{} conflict without execution id", conflict.kind))
    })
}

const fn outcome(transitioned: bool) -> ResolverOutcome {
    if transitioned {
        ResolverOutcome::Resolved
    } else {
        ResolverOutcome::NoOp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryAgentRepository, InMemoryExecutionRepository};
    use crate::domain::models::{LivenessConfig, Severity};

    struct Fixture {
        agents: Arc<InMemoryAgentRepository>,
        executions: Arc<InMemoryExecutionRepository>,
        service: ReconciliationService,
    }

    fn fixture_with(config: ReconciliationConfig) -> Fixture {
        let agents = Arc::new(InMemoryAgentRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let liveness = Arc::new(LivenessService::new(agents.clone(), LivenessConfig::default()));
        let service = ReconciliationService::new(agents.clone(), executions.clone(), liveness, config);
        Fixture {
            agents,
            executions,
            service,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ReconciliationConfig::default())
    }

    async fn online_agent(f: &Fixture, id: i64, host_id: i64) {
        f.agents
            .upsert(
                &Agent::new(id, host_id, format!("host-{host_id}"))
                    .with_status(AgentStatus::Online)
                    .with_heartbeat(Utc::now()),
            )
            .await
            .unwrap();
    }

    async fn running_execution(f: &Fixture, id: &str, host_id: i64, steps: &[(i64, StepStatus)]) {
        let started = Utc::now() - TimeDelta::minutes(1);
        f.executions
            .upsert_execution(&ExecutionRecord::new(id, vec![host_id]).running_since(started))
            .await
            .unwrap();
        for (order, (step_id, status)) in steps.iter().enumerate() {
            let step = ExecutionStep::new(*step_id, id, order as i64, vec![host_id]).running_since(started);
            f.executions.upsert_step(&step.with_status(*status)).await.unwrap();
        }
    }

    async fn status_of(f: &Fixture, id: &str) -> ExecutionStatus {
        f.executions.get_execution(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_all_success_steps_promote_to_success() {
        let f = fixture();
        online_agent(&f, 1, 10).await;
        running_execution(&f, "e1", 10, &[(1, StepStatus::Success), (2, StepStatus::Success)]).await;

        let report = f.service.reconcile_agent(1).await.unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].kind, ConflictKind::StuckRunningExecution);
        assert_eq!(report.summary.resolved, 1);
        assert_eq!(status_of(&f, "e1").await, ExecutionStatus::Success);
        assert!(f.executions.get_execution("e1").await.unwrap().unwrap().finished_at.is_some());
    }

    #[tokio::test]
    async fn test_one_failed_step_promotes_to_failed() {
        let f = fixture();
        online_agent(&f, 1, 10).await;
        running_execution(&f, "e1", 10, &[(1, StepStatus::Success), (2, StepStatus::Failed)]).await;

        f.service.reconcile_agent(1).await.unwrap();
        assert_eq!(status_of(&f, "e1").await, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let f = fixture();
        online_agent(&f, 1, 10).await;
        running_execution(&f, "e1", 10, &[(1, StepStatus::Success)]).await;

        f.service.reconcile_agent(1).await.unwrap();
        let again = f.service.reconcile_agent(1).await.unwrap();
        assert!(again.conflicts.is_empty());
        assert_eq!(status_of(&f, "e1").await, ExecutionStatus::Success);

        // Resolving a stale conflict directly is a no-op as well.
        let stale = Conflict::new(ConflictKind::StuckRunningExecution, Resolution::PromoteFromSteps, "stale")
            .for_execution("e1");
        assert_eq!(f.service.resolve(&stale).await.unwrap(), ResolverOutcome::NoOp);
    }

    #[tokio::test]
    async fn test_skipped_without_failures_is_unresolvable() {
        let f = fixture();
        online_agent(&f, 1, 10).await;
        running_execution(&f, "e1", 10, &[(1, StepStatus::Success), (2, StepStatus::Skipped)]).await;

        let report = f.service.reconcile_agent(1).await.unwrap();
        assert_eq!(report.summary.unresolvable, 1);
        assert_eq!(status_of(&f, "e1").await, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_execution_timeout_fails_execution() {
        let f = fixture();
        online_agent(&f, 1, 10).await;
        let started = Utc::now() - TimeDelta::minutes(10);
        f.executions
            .upsert_execution(
                &ExecutionRecord::new("slow", vec![10])
                    .running_since(started)
                    .with_timeout_secs(60),
            )
            .await
            .unwrap();

        let report = f.service.reconcile_agent(1).await.unwrap();
        assert_eq!(report.conflicts[0].kind, ConflictKind::ExecutionTimeout);
        let record = f.executions.get_execution("slow").await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_running_step_of_offline_agent_fails() {
        let f = fixture();
        f.agents
            .upsert(
                &Agent::new(2, 20, "gone")
                    .with_status(AgentStatus::Online)
                    .with_heartbeat(Utc::now() - TimeDelta::hours(1)),
            )
            .await
            .unwrap();
        running_execution(&f, "e2", 20, &[(5, StepStatus::Running)]).await;

        let report = f.service.reconcile_agent(2).await.unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].kind, ConflictKind::StepAgentOffline);
        assert_eq!(report.conflicts[0].severity, Severity::Critical);

        let step = f.executions.get_step(5).await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error_message.as_deref(), Some(AGENT_OFFLINE_REASON));
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let f = fixture();
        online_agent(&f, 1, 10).await;
        let started = Utc::now() - TimeDelta::minutes(1);
        f.executions
            .upsert_execution(&ExecutionRecord::new("e3", vec![10]).running_since(started))
            .await
            .unwrap();
        f.executions
            .upsert_step(
                &ExecutionStep::new(9, "e3", 0, vec![10])
                    .running_since(started)
                    .with_timeout_secs(5),
            )
            .await
            .unwrap();

        let conflicts = f.service.detect_agent_conflicts(1).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::StepTimeout);
        // Dry run leaves state alone.
        assert_eq!(f.executions.get_step(9).await.unwrap().unwrap().status, StepStatus::Running);
    }

    #[tokio::test]
    async fn test_cap_defers_overflow() {
        let f = fixture_with(ReconciliationConfig {
            max_conflicts_per_run: 2,
            ..ReconciliationConfig::default()
        });
        online_agent(&f, 1, 10).await;
        for i in 0..3 {
            running_execution(&f, &format!("e{i}"), 10, &[(i, StepStatus::Success)]).await;
        }

        let first = f.service.reconcile_agent(1).await.unwrap();
        assert_eq!(first.summary.resolved, 2);
        assert_eq!(first.summary.deferred, 1);

        let second = f.service.reconcile_agent(1).await.unwrap();
        assert_eq!(second.summary.resolved, 1);
        assert_eq!(second.summary.deferred, 0);
    }

    #[tokio::test]
    async fn test_reconcile_all_skips_disabled_agents() {
        let f = fixture();
        online_agent(&f, 1, 10).await;
        f.agents
            .upsert(&Agent::new(2, 20, "off").with_status(AgentStatus::Disabled))
            .await
            .unwrap();
        running_execution(&f, "e1", 10, &[(1, StepStatus::Success)]).await;
        running_execution(&f, "e2", 20, &[(2, StepStatus::Success)]).await;

        let sweep = f.service.reconcile_all().await.unwrap();
        assert_eq!(sweep.agents_checked, 1);
        assert_eq!(sweep.resolved, 1);
        assert_eq!(status_of(&f, "e2").await, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_global_anomalies_are_read_only() {
        let f = fixture();
        f.agents
            .upsert(&Agent::new(3, 30, "silent").with_status(AgentStatus::Online))
            .await
            .unwrap();
        let long_ago = Utc::now() - TimeDelta::hours(30);
        f.executions
            .upsert_execution(&ExecutionRecord::new("old", vec![30]).running_since(long_ago))
            .await
            .unwrap();
        f.executions
            .upsert_step(&ExecutionStep::new(1, "old", 0, vec![30]).running_since(long_ago))
            .await
            .unwrap();

        let conflicts = f.service.detect_global_anomalies(TimeDelta::hours(24)).await.unwrap();
        let kinds: Vec<_> = conflicts.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ConflictKind::OfflineAgentActiveSteps,
                ConflictKind::InconsistentStep,
                ConflictKind::LongRunningExecution,
            ]
        );
        assert_eq!(status_of(&f, "old").await, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_agent_errors() {
        let f = fixture();
        assert!(matches!(
            f.service.reconcile_agent(77).await,
            Err(DomainError::AgentNotFound(77))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_mode_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let service = Arc::new(f.service);
        let runner = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run_scheduled(Duration::from_millis(10), rx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let runs = runner.await.unwrap();
        assert!(runs >= 1);
    }
}
