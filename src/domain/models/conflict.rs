//! Reconciliation findings.
//!
//! Conflicts are never persisted. Detection produces them, resolution
//! consumes them, and callers may log or print them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of drift was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Execution `running` while every step is terminal.
    StuckRunningExecution,
    /// Execution `running` past its timeout.
    ExecutionTimeout,
    /// Step `running` past its timeout.
    StepTimeout,
    /// Step `running` while its agent is offline.
    StepAgentOffline,
    /// Global sweep: execution `running` longer than the lookback window.
    LongRunningExecution,
    /// Global sweep: step `running`/`pending` longer than the lookback window.
    InconsistentStep,
    /// Global sweep: offline agent with active steps on its host.
    OfflineAgentActiveSteps,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StuckRunningExecution => "stuck_running_execution",
            Self::ExecutionTimeout => "execution_timeout",
            Self::StepTimeout => "step_timeout",
            Self::StepAgentOffline => "step_agent_offline",
            Self::LongRunningExecution => "long_running_execution",
            Self::InconsistentStep => "inconsistent_step",
            Self::OfflineAgentActiveSteps => "offline_agent_active_steps",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::LongRunningExecution | Self::ExecutionTimeout => Severity::Medium,
            Self::InconsistentStep | Self::StuckRunningExecution | Self::StepTimeout => Severity::High,
            Self::OfflineAgentActiveSteps | Self::StepAgentOffline => Severity::Critical,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repair a resolver applies for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Derive the execution's terminal status from its steps.
    PromoteFromSteps,
    /// Fail the execution with a timeout reason.
    FailExecutionTimeout,
    /// Fail the step with a timeout reason.
    FailStepTimeout,
    /// Fail the step because its agent went offline.
    FailStepAgentOffline,
    /// Report only; operators decide.
    ReportOnly,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromoteFromSteps => "promote_from_steps",
            Self::FailExecutionTimeout => "fail_execution_timeout",
            Self::FailStepTimeout => "fail_step_timeout",
            Self::FailStepAgentOffline => "fail_step_agent_offline",
            Self::ReportOnly => "report_only",
        }
    }
}

/// A detected mismatch between recorded and evidenced state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub agent_id: Option<i64>,
    pub host_id: Option<i64>,
    pub execution_id: Option<String>,
    pub step_id: Option<i64>,
    pub reason: String,
    pub resolution: Resolution,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    pub fn new(kind: ConflictKind, resolution: Resolution, reason: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            agent_id: None,
            host_id: None,
            execution_id: None,
            step_id: None,
            reason: reason.into(),
            resolution,
            detected_at: Utc::now(),
        }
    }

    pub fn for_agent(mut self, agent_id: i64, host_id: i64) -> Self {
        self.agent_id = Some(agent_id);
        self.host_id = Some(host_id);
        self
    }

    pub fn for_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn for_step(mut self, step_id: i64) -> Self {
        self.step_id = Some(step_id);
        self
    }
}

/// Result of running one resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverOutcome {
    Resolved,
    /// Already resolved, or the record moved on since detection.
    NoOp,
    /// Evidence does not justify a transition; left for an operator.
    Unresolvable(String),
}

/// Summary of `resolve_conflicts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSummary {
    pub total: usize,
    pub resolved: usize,
    pub noop: usize,
    pub unresolvable: usize,
    pub failed: usize,
    /// Conflicts beyond the per-run cap, left for the next sweep.
    pub deferred: usize,
}

/// Per-agent reconciliation report.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReconcileReport {
    pub agent_id: i64,
    pub conflicts: Vec<Conflict>,
    pub summary: ResolveSummary,
}

/// Summary of a sweep over all agents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub agents_checked: usize,
    pub agents_failed: usize,
    pub conflicts_found: usize,
    pub resolved: usize,
    pub failed: usize,
    pub deferred: usize,
    pub errors: Vec<String>,
}

impl SweepSummary {
    pub fn absorb(&mut self, report: &AgentReconcileReport) {
        self.agents_checked += 1;
        self.conflicts_found += report.conflicts.len();
        self.resolved += report.summary.resolved;
        self.failed += report.summary.failed;
        self.deferred += report.summary.deferred;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_severities() {
        assert_eq!(ConflictKind::LongRunningExecution.severity(), Severity::Medium);
        assert_eq!(ConflictKind::InconsistentStep.severity(), Severity::High);
        assert_eq!(ConflictKind::OfflineAgentActiveSteps.severity(), Severity::Critical);
    }

    #[test]
    fn test_conflict_builder() {
        let conflict = Conflict::new(ConflictKind::StepTimeout, Resolution::FailStepTimeout, "late")
            .for_agent(3, 30)
            .for_execution("e-1")
            .for_step(9);
        assert_eq!(conflict.severity, Severity::High);
        assert_eq!(conflict.agent_id, Some(3));
        assert_eq!(conflict.host_id, Some(30));
        assert_eq!(conflict.step_id, Some(9));
    }
}
