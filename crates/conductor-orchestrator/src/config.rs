use crate::priority::DecisionRule;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of one [`Orchestrator`](crate::Orchestrator).
///
/// Every field has a default so a partial `[orchestrator]` table in a config
/// file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Execution units allowed in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retry ceiling and backoff.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// How long one dequeue attempt waits before re-checking for shutdown.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// Scheduler tick period.
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,
    /// How long `stop` waits for in-flight executions.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// TTL of status cache entries.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// History collection outcomes are written to and searched in.
    #[serde(default = "default_history_collection")]
    pub history_collection: String,
    /// Page size used when listing tasks during recovery.
    #[serde(default = "default_recovery_page_size")]
    pub recovery_page_size: usize,
    /// Cells overriding the default decision table.
    #[serde(default)]
    pub decision_rules: Vec<DecisionRule>,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_dequeue_timeout_ms() -> u64 {
    1_000
}

fn default_scheduler_tick_ms() -> u64 {
    60_000
}

fn default_shutdown_grace_ms() -> u64 {
    30_000
}

fn default_cache_ttl_secs() -> u64 {
    3_600
}

fn default_history_collection() -> String {
    "task_history".to_string()
}

fn default_recovery_page_size() -> usize {
    1_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry: RetryPolicy::default(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            history_collection: default_history_collection(),
            recovery_page_size: default_recovery_page_size(),
            decision_rules: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Dequeue wait as a duration.
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// Scheduler tick as a duration.
    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms.max(1))
    }

    /// Shutdown grace as a duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Cache TTL as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
