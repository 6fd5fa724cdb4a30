use serde::{Deserialize, Serialize};

/// HTTP listener for the `/mcp` endpoint and the diagnostics routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-IP token bucket.  Absent means unlimited.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl ServerConfig {
    /// `host:port` as handed to the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

/// Browser access to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, `scheme://host:*` for any port on a host, or a lone
    /// `"*"` for every origin.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
    /// Response headers scripts may read.  Browser clients need the session
    /// header to learn the id they were assigned.
    #[serde(default = "d_expose_headers")]
    pub expose_headers: Vec<String>,
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.len() == 1 && self.allowed_origins[0] == "*"
    }

    /// Whether `origin` matches one of the configured entries.
    pub fn matches_origin(&self, origin: &str) -> bool {
        if self.allows_any_origin() {
            return true;
        }
        self.allowed_origins
            .iter()
            .any(|allowed| match allowed.strip_suffix('*') {
                Some(prefix) if prefix.ends_with(':') => {
                    origin.strip_prefix(prefix).is_some_and(is_port)
                }
                _ => allowed == origin,
            })
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
            expose_headers: d_expose_headers(),
        }
    }
}

fn is_port(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    3400
}

fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

fn d_expose_headers() -> Vec<String> {
    vec!["mcp-session-id".into()]
}
