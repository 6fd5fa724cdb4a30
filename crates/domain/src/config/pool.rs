use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution slots, overflow queue and worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Operations allowed to run concurrently.
    #[serde(default = "d_max_connections")]
    pub max_connections: usize,

    /// Operations allowed to wait for a slot.  `0` disables queueing:
    /// with every slot busy, new work is rejected immediately.
    #[serde(default = "d_max_queue_size")]
    pub max_queue_size: usize,

    /// Deadline for one operation, measured from submission.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Number of worker tasks executing dispatched operations.
    #[serde(default = "d_worker_count")]
    pub worker_count: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: d_max_connections(),
            max_queue_size: d_max_queue_size(),
            request_timeout_ms: d_request_timeout_ms(),
            worker_count: d_worker_count(),
        }
    }
}

impl PoolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerPoolConfig {
    /// Live per-session protocol handlers.  The least recently active one
    /// is evicted to make room for a new session.
    #[serde(default = "d_max_servers")]
    pub max_servers: usize,
}

impl Default for ServerPoolConfig {
    fn default() -> Self {
        Self {
            max_servers: d_max_servers(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_connections() -> usize {
    10
}
fn d_max_queue_size() -> usize {
    100
}
fn d_request_timeout_ms() -> u64 {
    30_000
}
fn d_worker_count() -> usize {
    4
}
fn d_max_servers() -> usize {
    50
}
