//! Server pool: one protocol handler per session, at most `max_servers`
//! of them alive.
//!
//! Creation is idempotent per session: the map mutex is held across the
//! lookup, the (synchronous) factory call and the insert, so two racing
//! requests for an unseen session can never build two handlers.  Handler
//! shutdown hooks and listener notifications run after the lock is
//! released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use sg_domain::config::ServerPoolConfig;
use sg_domain::error::Result;
use sg_domain::trace::TraceEvent;

use crate::handler::{HandlerFactory, ProtocolHandler};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PooledServerHandle {
    handler: Arc<dyn ProtocolHandler>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    request_count: u64,
    activity_seq: u64,
}

/// Diagnostic snapshot of one pooled handle.
#[derive(Debug, Clone, Serialize)]
pub struct ServerHandleInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub request_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub active_servers: usize,
    pub max_servers: usize,
    pub utilization: f64,
    /// Sum of `request_count` over the live handles.
    pub total_requests: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Created { session_id: String },
    Evicted { session_id: String },
}

pub trait ServerListener: Send + Sync {
    fn on_server_event(&self, event: &ServerEvent);
}

impl<F> ServerListener for F
where
    F: Fn(&ServerEvent) + Send + Sync,
{
    fn on_server_event(&self, event: &ServerEvent) {
        self(event)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServerPool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ServerPool {
    max_servers: usize,
    factory: Arc<dyn HandlerFactory>,
    servers: Mutex<HashMap<String, PooledServerHandle>>,
    listeners: RwLock<Vec<Arc<dyn ServerListener>>>,
    seq: AtomicU64,
}

impl ServerPool {
    pub fn new(config: &ServerPoolConfig, factory: Arc<dyn HandlerFactory>) -> Self {
        Self {
            max_servers: config.max_servers.max(1),
            factory,
            servers: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn ServerListener>) {
        self.listeners.write().push(listener);
    }

    /// Return the session's handler, building it on first use.
    ///
    /// An existing handle is touched and its request count incremented.
    /// A new handle starts at one request.  At capacity the handle with the
    /// oldest activity is evicted first.
    pub fn get_or_create_server(&self, session_id: &str) -> Result<Arc<dyn ProtocolHandler>> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();

        let (handler, evicted, active) = {
            let mut servers = self.servers.lock();
            if let Some(handle) = servers.get_mut(session_id) {
                if now > handle.last_activity_at {
                    handle.last_activity_at = now;
                }
                handle.request_count += 1;
                handle.activity_seq = seq;
                return Ok(Arc::clone(&handle.handler));
            }

            let handler = self.factory.create(session_id)?;

            let evicted = if servers.len() >= self.max_servers {
                let victim = servers
                    .iter()
                    .min_by_key(|(_, h)| (h.last_activity_at, h.activity_seq))
                    .map(|(k, _)| k.clone());
                victim.and_then(|k| servers.remove(&k).map(|h| (k, h)))
            } else {
                None
            };

            servers.insert(
                session_id.to_owned(),
                PooledServerHandle {
                    handler: Arc::clone(&handler),
                    created_at: now,
                    last_activity_at: now,
                    request_count: 1,
                    activity_seq: seq,
                },
            );
            (handler, evicted, servers.len())
        };

        let mut events = Vec::with_capacity(2);
        if let Some((victim_id, handle)) = evicted {
            handle.handler.shutdown();
            tracing::info!(session_id = %victim_id, "server evicted (capacity)");
            TraceEvent::ServerEvicted {
                session_id: victim_id.clone(),
                request_count: handle.request_count,
            }
            .emit();
            events.push(ServerEvent::Evicted {
                session_id: victim_id,
            });
        }

        TraceEvent::ServerCreated {
            session_id: session_id.to_owned(),
            active_servers: active,
        }
        .emit();
        events.push(ServerEvent::Created {
            session_id: session_id.to_owned(),
        });

        self.notify(&events);
        Ok(handler)
    }

    /// Record activity on an existing handle.  Returns `false` (and creates
    /// nothing) when the session has no handle.
    pub fn touch_server(&self, session_id: &str) -> bool {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let mut servers = self.servers.lock();
        match servers.get_mut(session_id) {
            Some(handle) => {
                if now > handle.last_activity_at {
                    handle.last_activity_at = now;
                }
                handle.request_count += 1;
                handle.activity_seq = seq;
                true
            }
            None => false,
        }
    }

    /// Look up a handler without touching it.
    pub fn get_server(&self, session_id: &str) -> Option<Arc<dyn ProtocolHandler>> {
        self.servers
            .lock()
            .get(session_id)
            .map(|h| Arc::clone(&h.handler))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.servers.lock().contains_key(session_id)
    }

    /// Drop a session's handle (session closed or evicted), but only if it
    /// still holds `expected`.  A handle rebuilt for the same session in the
    /// meantime is left alone.  No event.
    pub fn remove_server(&self, session_id: &str, expected: &Arc<dyn ProtocolHandler>) -> bool {
        let removed = {
            let mut servers = self.servers.lock();
            match servers.get(session_id) {
                Some(h) if Arc::ptr_eq(&h.handler, expected) => servers.remove(session_id),
                _ => None,
            }
        };
        match removed {
            Some(handle) => {
                handle.handler.shutdown();
                tracing::debug!(session_id = %session_id, "server removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    pub fn get_stats(&self) -> ServerStats {
        let servers = self.servers.lock();
        let active = servers.len();
        ServerStats {
            active_servers: active,
            max_servers: self.max_servers,
            utilization: active as f64 / self.max_servers as f64,
            total_requests: servers.values().map(|h| h.request_count).sum(),
        }
    }

    pub fn list(&self) -> Vec<ServerHandleInfo> {
        let mut out: Vec<ServerHandleInfo> = self
            .servers
            .lock()
            .iter()
            .map(|(id, h)| ServerHandleInfo {
                session_id: id.clone(),
                created_at: h.created_at,
                last_activity_at: h.last_activity_at,
                request_count: h.request_count,
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Drop every handle.
    pub fn shutdown(&self) {
        let drained: Vec<PooledServerHandle> =
            self.servers.lock().drain().map(|(_, h)| h).collect();
        let count = drained.len();
        for handle in drained {
            handle.handler.shutdown();
        }
        tracing::info!(servers = count, "server pool cleared");
    }

    fn notify(&self, events: &[ServerEvent]) {
        let listeners: Vec<Arc<dyn ServerListener>> = self.listeners.read().clone();
        for event in events {
            for listener in &listeners {
                listener.on_server_event(event);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
