use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session table lifecycle rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// A session untouched for longer than this is evicted by the sweep.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,

    /// How often the idle sweep runs.
    #[serde(default = "d_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Hard cap on live sessions.  Creating one more evicts the least
    /// recently active session first.
    #[serde(default = "d_max_sessions")]
    pub max_sessions: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_timeout_secs(),
            sweep_interval_secs: d_sweep_interval_secs(),
            max_sessions: d_max_sessions(),
        }
    }
}

impl SessionsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout_secs() -> u64 {
    30 * 60
}
fn d_sweep_interval_secs() -> u64 {
    60
}
fn d_max_sessions() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SessionsConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_secs(1800));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.max_sessions, 1000);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: SessionsConfig = toml::from_str("timeout_secs = 5").unwrap();
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.sweep_interval_secs, 60);
    }
}
