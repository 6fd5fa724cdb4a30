mod observability;
mod pool;
mod server;
mod sessions;
mod transport;

pub use observability::*;
pub use pool::*;
pub use server::*;
pub use sessions::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Execution slots, overflow queue and worker pool.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Per-session protocol handler instances.
    #[serde(default)]
    pub servers: ServerPoolConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error(
                "server.port",
                "port must be greater than 0",
            ));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        // Capacities of zero would reject every request.
        if self.sessions.max_sessions == 0 {
            errors.push(ConfigError::error(
                "sessions.max_sessions",
                "max_sessions must be greater than 0",
            ));
        }
        if self.sessions.timeout_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }
        if self.sessions.sweep_interval_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.sweep_interval_secs",
                "sweep_interval_secs must be greater than 0",
            ));
        } else if self.sessions.sweep_interval_secs > self.sessions.timeout_secs {
            errors.push(ConfigError::warning(
                "sessions.sweep_interval_secs",
                "sweep interval is longer than the session timeout; idle sessions will outlive their timeout",
            ));
        }

        if self.pool.max_connections == 0 {
            errors.push(ConfigError::error(
                "pool.max_connections",
                "max_connections must be greater than 0",
            ));
        }
        if self.pool.worker_count == 0 {
            errors.push(ConfigError::error(
                "pool.worker_count",
                "worker_count must be greater than 0",
            ));
        }
        if self.pool.request_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "pool.request_timeout_ms",
                "request_timeout_ms must be greater than 0",
            ));
        }
        if self.pool.worker_count < self.pool.max_connections {
            errors.push(ConfigError::warning(
                "pool.worker_count",
                format!(
                    "{} workers for {} execution slots; dispatched operations will wait for a free worker",
                    self.pool.worker_count, self.pool.max_connections
                ),
            ));
        }

        if self.servers.max_servers == 0 {
            errors.push(ConfigError::error(
                "servers.max_servers",
                "max_servers must be greater than 0",
            ));
        }
        if self.servers.max_servers > self.sessions.max_sessions {
            errors.push(ConfigError::warning(
                "servers.max_servers",
                "max_servers exceeds max_sessions; the extra handler slots can never be used",
            ));
        }

        if self.transport.compat_init && self.transport.compat_versions.is_empty() {
            errors.push(ConfigError::warning(
                "transport.compat_versions",
                "compat_init is enabled but no protocol versions are listed",
            ));
        }
        if self.transport.accepted_versions.is_empty() {
            errors.push(ConfigError::error(
                "transport.accepted_versions",
                "at least one protocol version must be accepted",
            ));
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                errors.push(ConfigError::error(
                    "server.rate_limit",
                    "requests_per_second and burst_size must be greater than 0",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::warning(
                "observability.sample_rate",
                format!(
                    "sample_rate {} is outside [0, 1] and will be clamped",
                    self.observability.sample_rate
                ),
            ));
        }

        if self.server.cors.allows_any_origin() {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}
