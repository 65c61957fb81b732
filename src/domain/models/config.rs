use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration structure for fleetline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Event log / log buffer connection
    #[serde(default)]
    pub redis: RedisConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Stream keys, consumer group and consumer tuning
    #[serde(default)]
    pub streams: StreamsConfig,

    /// Execution log buffering
    #[serde(default)]
    pub log_buffer: LogBufferConfig,

    /// Liveness thresholds and cache policy
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Reconciliation engine limits and timeouts
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Control channel to Agent-Servers
    #[serde(default)]
    pub agent_server: AgentServerConfig,
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Seconds to wait when establishing a connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".fleetline/fleetline.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Stream consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamsConfig {
    /// Consumer group shared by every control-plane worker
    #[serde(default = "default_group")]
    pub group: String,

    /// Consumer identity; generated from hostname and pid when unset
    #[serde(default)]
    pub consumer_name: Option<String>,

    /// Stream keys; an empty key disables that stream
    #[serde(default = "default_logs_stream")]
    pub logs: String,

    #[serde(default = "default_results_stream")]
    pub results: String,

    #[serde(default = "default_status_stream")]
    pub status: String,

    #[serde(default = "default_task_stats_stream")]
    pub task_stats: String,

    /// Messages per read
    #[serde(default = "default_count")]
    pub count: usize,

    /// Milliseconds a read blocks waiting for new messages
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,

    /// Minimum idle time before a pending entry is reclaimed
    #[serde(default = "default_reclaim_idle_ms")]
    pub reclaim_idle_ms: u64,

    #[serde(default = "default_reclaim_count")]
    pub reclaim_count: usize,

    /// Write failed messages to `{stream}:dlq`
    #[serde(default = "default_true")]
    pub dead_letter: bool,

    /// Upper bound for a single handler invocation
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Delay before retrying after a transport error
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_group() -> String {
    "control-plane".to_string()
}

fn default_logs_stream() -> String {
    "agent_logs".to_string()
}

fn default_results_stream() -> String {
    "agent_results".to_string()
}

fn default_status_stream() -> String {
    "agent_status".to_string()
}

fn default_task_stats_stream() -> String {
    "agent_task_stats".to_string()
}

const fn default_count() -> usize {
    100
}

const fn default_block_ms() -> u64 {
    1000
}

const fn default_reclaim_interval_secs() -> u64 {
    60
}

const fn default_reclaim_idle_ms() -> u64 {
    60_000
}

const fn default_reclaim_count() -> usize {
    50
}

const fn default_true() -> bool {
    true
}

const fn default_handler_timeout_secs() -> u64 {
    30
}

const fn default_error_backoff_ms() -> u64 {
    1000
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            consumer_name: None,
            logs: default_logs_stream(),
            results: default_results_stream(),
            status: default_status_stream(),
            task_stats: default_task_stats_stream(),
            count: default_count(),
            block_ms: default_block_ms(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
            reclaim_idle_ms: default_reclaim_idle_ms(),
            reclaim_count: default_reclaim_count(),
            dead_letter: default_true(),
            handler_timeout_secs: default_handler_timeout_secs(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

/// Execution log buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LogBufferConfig {
    #[serde(default = "default_log_key_prefix")]
    pub key_prefix: String,

    /// Days a buffered execution log is kept before expiring
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u64,

    /// Rows per bulk insert when flushing
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
}

fn default_log_key_prefix() -> String {
    "agent_log_store".to_string()
}

const fn default_log_retention_days() -> u64 {
    30
}

const fn default_flush_batch_size() -> usize {
    500
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_log_key_prefix(),
            retention_days: default_log_retention_days(),
            flush_batch_size: default_flush_batch_size(),
        }
    }
}

/// Liveness evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LivenessConfig {
    /// Seconds without a heartbeat before an agent is offline
    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,

    /// Per-environment thresholds keyed by host tag
    #[serde(default)]
    pub env_thresholds: HashMap<String, u64>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// TTL never drops below this
    #[serde(default = "default_cache_ttl_floor_secs")]
    pub cache_ttl_floor_secs: u64,

    /// Thresholds below this shrink the TTL to a tenth of the threshold
    #[serde(default = "default_short_threshold_secs")]
    pub short_threshold_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

const fn default_offline_threshold_secs() -> u64 {
    600
}

const fn default_cache_ttl_secs() -> u64 {
    15
}

const fn default_cache_ttl_floor_secs() -> u64 {
    5
}

const fn default_short_threshold_secs() -> u64 {
    60
}

const fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            offline_threshold_secs: default_offline_threshold_secs(),
            env_thresholds: HashMap::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_ttl_floor_secs: default_cache_ttl_floor_secs(),
            short_threshold_secs: default_short_threshold_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReconciliationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Conflicts resolved per invocation; overflow waits for the next sweep
    #[serde(default = "default_max_conflicts_per_run")]
    pub max_conflicts_per_run: usize,

    /// Lookback for per-agent detection, in hours
    #[serde(default = "default_conflict_window_hours")]
    pub conflict_window_hours: i64,

    /// Applied to executions without their own timeout
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: i64,

    /// Applied to steps without their own timeout
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: i64,

    /// Interval for scheduled sweeps
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
}

const fn default_max_conflicts_per_run() -> usize {
    100
}

const fn default_conflict_window_hours() -> i64 {
    24
}

const fn default_execution_timeout_secs() -> i64 {
    7200
}

const fn default_step_timeout_secs() -> i64 {
    300
}

const fn default_reconcile_interval_secs() -> u64 {
    300
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_conflicts_per_run: default_max_conflicts_per_run(),
            conflict_window_hours: default_conflict_window_hours(),
            execution_timeout_secs: default_execution_timeout_secs(),
            step_timeout_secs: default_step_timeout_secs(),
            interval_secs: default_reconcile_interval_secs(),
        }
    }
}

/// Agent-Server control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentServerConfig {
    /// Shared HMAC secret; requests go out unsigned when unset
    #[serde(default)]
    pub shared_secret: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,

    /// Accepted clock skew when verifying signatures
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: i64,
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_replay_window_secs() -> i64 {
    300
}

impl Default for AgentServerConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            timeout_secs: default_request_timeout_secs(),
            replay_window_secs: default_replay_window_secs(),
        }
    }
}
