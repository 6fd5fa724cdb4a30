use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport / compatibility handshake
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport lifecycle and protocol version policy.
///
/// When a client sends a non-initialize request for a session the server
/// has no transport for, the router can synthesize an `initialize` on the
/// client's behalf.  `compat_versions` is tried in order and the first
/// version the handler accepts wins.  If none is accepted the original
/// request is forwarded anyway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Enable the synthesized initialize.
    #[serde(default = "d_true")]
    pub compat_init: bool,

    /// Protocol versions tried by the synthesized initialize, newest first.
    #[serde(default = "d_protocol_versions")]
    pub compat_versions: Vec<String>,

    /// Protocol versions the built-in handlers accept on `initialize`.
    #[serde(default = "d_protocol_versions")]
    pub accepted_versions: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compat_init: true,
            compat_versions: d_protocol_versions(),
            accepted_versions: d_protocol_versions(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_protocol_versions() -> Vec<String> {
    vec![
        "2025-06-18".into(),
        "2025-03-26".into(),
        "2024-11-05".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_enabled_by_default() {
        let cfg = TransportConfig::default();
        assert!(cfg.compat_init);
        assert_eq!(cfg.compat_versions[0], "2025-06-18");
        assert_eq!(cfg.compat_versions.len(), 3);
    }

    #[test]
    fn compat_can_be_disabled() {
        let cfg: TransportConfig = toml::from_str("compat_init = false").unwrap();
        assert!(!cfg.compat_init);
        assert_eq!(cfg.accepted_versions.len(), 3);
    }
}
