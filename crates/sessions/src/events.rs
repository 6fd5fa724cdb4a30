use serde::Serialize;

use crate::manager::Session;

/// Why a session left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionReason {
    /// Idle for longer than the session timeout.
    Timeout,
    /// Oldest session removed to admit a new one.
    Capacity,
    /// Explicitly closed by the client or the server.
    Closed,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Capacity => "capacity",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notification delivered to every [`SessionListener`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Created { session: Session },
    Evicted { session: Session, reason: EvictionReason },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Created { session } | Self::Evicted { session, .. } => &session.id,
        }
    }
}

/// Synchronous subscriber to session lifecycle events.
///
/// Called on the thread that caused the event, after the session table
/// lock has been released, so implementations may call back into the
/// manager.
pub trait SessionListener: Send + Sync {
    fn on_session_event(&self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_session_event(&self, event: &SessionEvent) {
        self(event)
    }
}
