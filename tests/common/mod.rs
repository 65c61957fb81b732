//! Common test utilities for integration tests
//!
//! Shared fixtures for the stream pipeline, liveness and reconciliation
//! scenarios. Everything runs against the in-memory adapters unless a test
//! opens its own SQLite pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fleetline::adapters::memory::InMemoryStreamLog;
use fleetline::cli::Runtime;
use fleetline::domain::models::{Agent, Config, LivenessConfig};
use fleetline::domain::ports::{AgentRepository, StreamHandler};
use fleetline::services::{StreamConfig, StreamConsumer};

#[allow(dead_code)]
pub const GROUP: &str = "control-plane";

/// Build message fields from string pairs.
#[allow(dead_code)]
pub fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// In-memory runtime with a one-second offline threshold and no TTL floor.
#[allow(dead_code)]
pub fn runtime() -> Runtime {
    let config = Config {
        liveness: LivenessConfig {
            offline_threshold_secs: 1,
            cache_ttl_floor_secs: 0,
            ..LivenessConfig::default()
        },
        ..Config::default()
    };
    Runtime::in_memory(config)
}

/// A consumer on `stream` that dead-letters to `{stream}:dlq` and never blocks.
#[allow(dead_code)]
pub fn consumer(
    log: &InMemoryStreamLog,
    stream: &str,
    consumer: &str,
    handler: Arc<dyn StreamHandler>,
) -> StreamConsumer {
    let config = StreamConfig::new(stream, GROUP, consumer, handler)
        .with_dead_letter(format!("{stream}:dlq"))
        .with_batch(10, Duration::from_millis(10))
        .with_reclaim(Duration::ZERO, 50);
    StreamConsumer::new(Arc::new(log.clone()), config)
}

/// Register an agent with a fresh heartbeat.
#[allow(dead_code)]
pub async fn seed_agent(runtime: &Runtime, id: i64, host_id: i64) -> Agent {
    let agent = Agent::new(id, host_id, format!("host-{host_id}")).with_heartbeat(chrono::Utc::now());
    runtime.agents.upsert(&agent).await.expect("seed agent");
    agent
}
