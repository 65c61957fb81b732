//! Execution records and steps.
//!
//! These entities belong to the job executor. This crate only merges agent
//! results into them and repairs `running` records that drifted from the
//! evidence available (step outcomes, timeouts, agent liveness).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Running or waiting to run.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-level progress aggregated by the Agent-Server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExecutionProgress {
    pub progress: Option<i64>,
    pub total_hosts: Option<i64>,
    pub success_hosts: Option<i64>,
    pub failed_hosts: Option<i64>,
    pub running_hosts: Option<i64>,
    pub pending_hosts: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExecutionProgress {
    /// True when the update carries no progress figures at all.
    pub fn is_empty(&self) -> bool {
        self.progress.is_none()
            && self.total_hosts.is_none()
            && self.success_hosts.is_none()
            && self.failed_hosts.is_none()
            && self.running_hosts.is_none()
            && self.pending_hosts.is_none()
    }
}

/// An execution of a job (script, file transfer, plan) across hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Correlation id carried by every stream message.
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Execution timeout in seconds; `None` falls back to the configured default.
    pub timeout_secs: Option<i64>,
    pub target_host_ids: Vec<i64>,
    pub error_message: Option<String>,
    pub exit_code: Option<i64>,
    pub error_code: Option<String>,
    pub log_pointer: Option<String>,
    pub log_size: Option<i64>,
    pub progress: Option<ExecutionProgress>,
}

impl ExecutionRecord {
    pub fn new(execution_id: impl Into<String>, target_host_ids: Vec<i64>) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            timeout_secs: None,
            target_host_ids,
            error_message: None,
            exit_code: None,
            error_code: None,
            log_pointer: None,
            log_size: None,
            progress: None,
        }
    }

    /// Mark the record running since `at`.
    pub fn running_since(mut self, at: DateTime<Utc>) -> Self {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(at);
        if self.created_at > at {
            self.created_at = at;
        }
        self
    }

    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn targets_host(&self, host_id: i64) -> bool {
        self.target_host_ids.contains(&host_id)
    }
}

/// One step of an execution, fanned out to one or more hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: i64,
    pub execution_id: String,
    pub step_order: i64,
    pub name: String,
    pub status: StepStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Step timeout in seconds; `None` falls back to the configured default.
    pub timeout_secs: Option<i64>,
    pub host_ids: Vec<i64>,
    pub error_message: Option<String>,
}

impl ExecutionStep {
    pub fn new(id: i64, execution_id: impl Into<String>, step_order: i64, host_ids: Vec<i64>) -> Self {
        Self {
            id,
            execution_id: execution_id.into(),
            step_order,
            name: format!("step-{step_order}"),
            status: StepStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            timeout_secs: None,
            host_ids,
            error_message: None,
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn running_since(mut self, at: DateTime<Utc>) -> Self {
        self.status = StepStatus::Running;
        self.started_at = Some(at);
        if self.created_at > at {
            self.created_at = at;
        }
        self
    }

    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn addresses_host(&self, host_id: i64) -> bool {
        self.host_ids.contains(&host_id)
    }
}

/// Result payload extracted from the result stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskResult {
    /// Reported status; `None` when missing or outside the known vocabulary.
    pub status: Option<ExecutionStatus>,
    pub exit_code: Option<i64>,
    pub error_msg: Option<String>,
    pub error_code: Option<String>,
    pub log_size: Option<i64>,
    pub log_pointer: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of merging a result into the execution store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultApplication {
    Applied,
    /// No execution with that id exists (yet).
    NotFound,
}

/// Conditional transition of a `running` execution to a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTransition {
    pub execution_id: String,
    pub to: ExecutionStatus,
    pub error_message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Conditional transition of a `running` step to a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTransition {
    pub step_id: i64,
    pub to: StepStatus,
    pub error_message: Option<String>,
    pub finished_at: DateTime<Utc>,
}
