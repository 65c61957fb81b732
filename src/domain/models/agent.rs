//! Agent domain model.
//!
//! An agent is a remote execution process running on a host. Its
//! administrative status is owned by operators (pending/disabled are
//! authoritative) and refreshed by heartbeats (online/offline).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness/administrative status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered but not yet admitted by an operator.
    Pending,
    Online,
    Offline,
    /// Switched off by an operator.
    Disabled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Disabled => "disabled",
        }
    }

    /// Parse the closed status vocabulary. Anything else is `None`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Statuses set by operators that short-circuit heartbeat evaluation.
    pub fn is_administrative(&self) -> bool {
        matches!(self, Self::Pending | Self::Disabled)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of process an agent record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    /// An execution agent reached through an Agent-Server.
    #[default]
    Agent,
    /// An Agent-Server itself.
    AgentServer,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::AgentServer => "agent-server",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(Self::Agent),
            "agent-server" | "agent_server" => Some(Self::AgentServer),
            _ => None,
        }
    }
}

/// Agent record as stored by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    /// Host the agent runs on; steps and executions address hosts.
    pub host_id: i64,
    pub host_name: String,
    pub agent_type: AgentType,
    /// Administrative status as last persisted.
    pub status: AgentStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_error_code: String,
    /// Host tags in declaration order; used to resolve environment thresholds.
    pub tags: Vec<String>,
    /// Base URL of the Agent-Server fronting this agent.
    pub endpoint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a pending agent for the given host.
    pub fn new(id: i64, host_id: i64, host_name: impl Into<String>) -> Self {
        Self {
            id,
            host_id,
            host_name: host_name.into(),
            agent_type: AgentType::Agent,
            status: AgentStatus::Pending,
            last_heartbeat_at: None,
            last_error_code: String::new(),
            tags: Vec::new(),
            endpoint: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat_at = Some(at);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Heartbeat update applied by the agent-status stream handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatUpdate {
    pub agent_id: i64,
    pub status: AgentStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub last_error_code: String,
}

/// Aggregate task counters reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentTaskStats {
    pub agent_id: i64,
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub avg_duration_ms: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AgentTaskStats {
    /// Fraction of successful tasks, 0 when nothing ran yet.
    pub fn success_rate(&self) -> f64 {
        if self.total <= 0 {
            return 0.0;
        }
        self.success as f64 / self.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_vocabulary_is_closed() {
        assert_eq!(AgentStatus::from_str("online"), Some(AgentStatus::Online));
        assert_eq!(AgentStatus::from_str("OFFLINE"), Some(AgentStatus::Offline));
        assert_eq!(AgentStatus::from_str(" disabled "), Some(AgentStatus::Disabled));
        assert_eq!(AgentStatus::from_str("busy"), None);
        assert_eq!(AgentStatus::from_str(""), None);
    }

    #[test]
    fn test_administrative_statuses() {
        assert!(AgentStatus::Pending.is_administrative());
        assert!(AgentStatus::Disabled.is_administrative());
        assert!(!AgentStatus::Online.is_administrative());
        assert!(!AgentStatus::Offline.is_administrative());
    }

    #[test]
    fn test_success_rate() {
        let mut stats = AgentTaskStats {
            agent_id: 1,
            ..Default::default()
        };
        assert!(stats.success_rate().abs() < f64::EPSILON);

        stats.total = 4;
        stats.success = 3;
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
