//! Heartbeat-driven agent liveness with a short-lived cache.
//!
//! `pending` and `disabled` are administrative and returned as-is. Any
//! other agent is `online` while its last heartbeat is within the
//! threshold of its environment, and `offline` otherwise. Cache entries
//! live for a TTL that shrinks with small thresholds so staleness stays
//! bounded relative to the liveness window.

use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use moka::Expiry;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus, LivenessConfig};
use crate::domain::ports::AgentRepository;

/// Prefix of liveness cache keys.
pub const CACHE_KEY_PREFIX: &str = "agent:status";

pub fn cache_key(agent_id: i64) -> String {
    format!("{CACHE_KEY_PREFIX}:{agent_id}")
}

/// Where a cached status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessSource {
    /// Derived from the heartbeat timestamp.
    Computed,
    /// Set by an operator action.
    Explicit,
}

/// Cached liveness of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessEntry {
    pub agent_id: i64,
    pub status: AgentStatus,
    pub updated_at: DateTime<Utc>,
    pub source: LivenessSource,
    #[serde(skip)]
    ttl: Duration,
}

impl LivenessEntry {
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

struct EntryTtl;

impl Expiry<String, LivenessEntry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, value: &LivenessEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &LivenessEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct LivenessService {
    agents: Arc<dyn AgentRepository>,
    config: LivenessConfig,
    cache: Cache<String, LivenessEntry>,
}

impl LivenessService {
    pub fn new(agents: Arc<dyn AgentRepository>, config: LivenessConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .expire_after(EntryTtl)
            .build();
        Self { agents, config, cache }
    }

    /// Offline threshold for an agent: the first tag with a configured
    /// environment threshold wins, else the global default.
    pub fn threshold_for(&self, agent: &Agent) -> Duration {
        let secs = agent
            .tags
            .iter()
            .find_map(|tag| self.config.env_thresholds.get(tag))
            .copied()
            .unwrap_or(self.config.offline_threshold_secs);
        Duration::from_secs(secs)
    }

    /// Cache TTL for a resolved threshold.
    pub fn cache_ttl(&self, threshold: Duration) -> Duration {
        if threshold < Duration::from_secs(self.config.short_threshold_secs) {
            (threshold / 10).max(Duration::from_secs(self.config.cache_ttl_floor_secs))
        } else {
            Duration::from_secs(self.config.cache_ttl_secs)
        }
    }

    /// Pure liveness evaluation at `now`.
    pub fn evaluate(&self, agent: &Agent, now: DateTime<Utc>) -> AgentStatus {
        if agent.status.is_administrative() {
            return agent.status;
        }
        let Some(last_heartbeat) = agent.last_heartbeat_at else {
            return AgentStatus::Offline;
        };

        let threshold = TimeDelta::from_std(self.threshold_for(agent)).unwrap_or(TimeDelta::MAX);
        if now - last_heartbeat <= threshold {
            AgentStatus::Online
        } else {
            AgentStatus::Offline
        }
    }

    /// Cached liveness; recomputed from the store on a miss. `None` for unknown agents.
    pub async fn get_liveness(&self, agent_id: i64) -> DomainResult<Option<LivenessEntry>> {
        if let Some(entry) = self.cache.get(&cache_key(agent_id)).await {
            return Ok(Some(entry));
        }
        self.compute_and_cache(agent_id).await
    }

    /// Recompute from the store and cache the result.
    pub async fn compute_and_cache(&self, agent_id: i64) -> DomainResult<Option<LivenessEntry>> {
        match self.agents.get(agent_id).await? {
            Some(agent) => Ok(Some(self.refresh(&agent).await)),
            None => {
                self.invalidate(agent_id).await;
                Ok(None)
            }
        }
    }

    /// Evaluate an already-loaded agent and overwrite its cache entry.
    pub async fn refresh(&self, agent: &Agent) -> LivenessEntry {
        let now = Utc::now();
        let entry = LivenessEntry {
            agent_id: agent.id,
            status: self.evaluate(agent, now),
            updated_at: now,
            source: LivenessSource::Computed,
            ttl: self.cache_ttl(self.threshold_for(agent)),
        };
        self.cache.insert(cache_key(agent.id), entry.clone()).await;
        entry
    }

    /// Cache a status without recomputation, with the agent's own TTL.
    pub async fn set_explicit(&self, agent: &Agent, status: AgentStatus) -> LivenessEntry {
        let entry = LivenessEntry {
            agent_id: agent.id,
            status,
            updated_at: Utc::now(),
            source: LivenessSource::Explicit,
            ttl: self.cache_ttl(self.threshold_for(agent)),
        };
        self.cache.insert(cache_key(agent.id), entry.clone()).await;
        entry
    }

    pub async fn invalidate(&self, agent_id: i64) {
        self.cache.invalidate(&cache_key(agent_id)).await;
    }

    async fn set_administrative(&self, agent_id: i64, status: AgentStatus) -> DomainResult<LivenessEntry> {
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or(DomainError::AgentNotFound(agent_id))?;
        self.agents.set_status(agent_id, status, Utc::now()).await?;
        Ok(self.set_explicit(&agent, status).await)
    }

    /// Operator action: admit the agent and mark it online.
    pub async fn enable_agent(&self, agent_id: i64) -> DomainResult<LivenessEntry> {
        let entry = self.set_administrative(agent_id, AgentStatus::Online).await?;
        tracing::info!(agent_id, "agent enabled");
        Ok(entry)
    }

    /// Operator action: switch the agent off.
    pub async fn disable_agent(&self, agent_id: i64) -> DomainResult<LivenessEntry> {
        let entry = self.set_administrative(agent_id, AgentStatus::Disabled).await?;
        tracing::info!(agent_id, "agent disabled");
        Ok(entry)
    }
}
