//! One client-facing channel bound to exactly one session.
//!
//! A transport starts `Uninitialized`, becomes `Active` once an
//! `initialize` is accepted by its handler, and ends `Closed`.  Close hooks
//! run exactly once, on whichever thread closes it first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

use sg_domain::error::{Error, Result};
use sg_pool::ProtocolHandler;
use sg_protocol::RequestKind;

type CloseHook = Box<dyn FnOnce(&str) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransportState {
    Uninitialized,
    Active { protocol_version: String },
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportInfo {
    #[serde(flatten)]
    pub state: TransportState,
    pub opened_at: DateTime<Utc>,
}

pub struct Transport {
    session_id: String,
    handler: Arc<dyn ProtocolHandler>,
    state: Mutex<TransportState>,
    close_hooks: Mutex<Vec<CloseHook>>,
    created_at: DateTime<Utc>,
}

impl Transport {
    pub fn new(session_id: impl Into<String>, handler: Arc<dyn ProtocolHandler>) -> Self {
        Self {
            session_id: session_id.into(),
            handler,
            state: Mutex::new(TransportState::Uninitialized),
            close_hooks: Mutex::new(Vec::new()),
            created_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn handler(&self) -> &Arc<dyn ProtocolHandler> {
        &self.handler
    }

    /// Diagnostics snapshot: current state plus when the transport opened.
    pub fn info(&self) -> TransportInfo {
        TransportInfo {
            state: self.state(),
            opened_at: self.created_at,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), TransportState::Closed)
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.lock(), TransportState::Active { .. })
    }

    /// Negotiated protocol version, once active.
    pub fn protocol_version(&self) -> Option<String> {
        match &*self.state.lock() {
            TransportState::Active { protocol_version } => Some(protocol_version.clone()),
            _ => None,
        }
    }

    /// Run one request against the session's handler.
    pub async fn handle(&self, kind: RequestKind) -> Result<Value> {
        match kind {
            RequestKind::Initialize(params) => {
                self.ensure_open()?;
                let requested = params.protocol_version.clone();
                if !self.handler.accepts_protocol_version(&requested) {
                    return Err(Error::ProtocolVersionMismatch {
                        requested,
                        supported: self.handler.supported_protocol_versions().to_vec(),
                    });
                }
                let result = self.handler.initialize(params).await?;
                {
                    let mut state = self.state.lock();
                    if matches!(*state, TransportState::Closed) {
                        return Err(Error::TransportClosed(self.session_id.clone()));
                    }
                    *state = TransportState::Active {
                        protocol_version: result.protocol_version.clone(),
                    };
                }
                tracing::debug!(
                    session_id = %self.session_id,
                    protocol_version = %result.protocol_version,
                    "transport initialized"
                );
                Ok(serde_json::to_value(result)?)
            }
            RequestKind::Ping => {
                self.ensure_open()?;
                Ok(json!({}))
            }
            RequestKind::Close => {
                self.close();
                Ok(json!({ "closed": true }))
            }
            RequestKind::Call { method, params } => {
                match self.state() {
                    TransportState::Uninitialized => {
                        Err(Error::NotInitialized(self.session_id.clone()))
                    }
                    TransportState::Closed => Err(Error::TransportClosed(self.session_id.clone())),
                    TransportState::Active { .. } => self.handler.handle(&method, params).await,
                }
            }
        }
    }

    /// Register a hook to run when the transport closes.  Runs immediately
    /// if it is already closed.
    pub fn on_close(&self, hook: impl FnOnce(&str) + Send + 'static) {
        // The state lock orders this push against `close` taking the hooks.
        let state = self.state.lock();
        if matches!(*state, TransportState::Closed) {
            drop(state);
            hook(&self.session_id);
            return;
        }
        self.close_hooks.lock().push(Box::new(hook));
    }

    /// Close the transport.  Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(*state, TransportState::Closed) {
                return false;
            }
            *state = TransportState::Closed;
        }
        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        for hook in hooks {
            hook(&self.session_id);
        }
        tracing::debug!(session_id = %self.session_id, "transport closed");
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::TransportClosed(self.session_id.clone()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("session_id", &self.session_id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
