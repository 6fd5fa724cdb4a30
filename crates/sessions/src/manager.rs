//! In-memory session table with capacity eviction and an idle sweep.
//!
//! Sessions are volatile: nothing is persisted, and every removal (idle
//! timeout, capacity pressure, explicit close) is reported to listeners as
//! a [`SessionEvent::Evicted`] so the pools can release what they hold for
//! that session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sg_domain::config::SessionsConfig;
use sg_domain::trace::TraceEvent;

use crate::events::{EvictionReason, SessionEvent, SessionListener};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot of one logical session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub request_count: u64,
}

struct Entry {
    session: Session,
    /// Tie-breaker for sessions touched within the same clock tick.
    activity_seq: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    timeout: Duration,
    max_sessions: usize,
    sessions: RwLock<HashMap<String, Entry>>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    seq: AtomicU64,
}

impl SessionManager {
    pub fn new(timeout: Duration, max_sessions: usize) -> Self {
        Self {
            timeout,
            max_sessions: max_sessions.max(1),
            sessions: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &SessionsConfig) -> Self {
        Self::new(config.timeout(), config.max_sessions)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Register a lifecycle listener.
    pub fn subscribe(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    /// Return the session for `id`, creating it if unknown.
    ///
    /// If the table is full, the least recently active session is evicted
    /// first with reason `capacity`.
    pub fn get_or_create_session(&self, id: &str) -> Session {
        let mut events = Vec::new();
        let session = {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get(id) {
                return entry.session.clone();
            }

            if sessions.len() >= self.max_sessions {
                let victim = sessions
                    .iter()
                    .min_by_key(|(_, e)| (e.session.last_activity_at, e.activity_seq))
                    .map(|(k, _)| k.clone());
                if let Some(entry) = victim.and_then(|k| sessions.remove(&k)) {
                    self.emit_evicted(&entry.session, EvictionReason::Capacity, Utc::now());
                    events.push(SessionEvent::Evicted {
                        session: entry.session,
                        reason: EvictionReason::Capacity,
                    });
                }
            }

            let now = Utc::now();
            let session = Session {
                id: id.to_owned(),
                created_at: now,
                last_activity_at: now,
                request_count: 0,
            };
            sessions.insert(
                id.to_owned(),
                Entry {
                    session: session.clone(),
                    activity_seq: self.next_seq(),
                },
            );

            TraceEvent::SessionCreated {
                session_id: id.to_owned(),
                live_sessions: sessions.len(),
            }
            .emit();
            session
        };

        events.push(SessionEvent::Created {
            session: session.clone(),
        });
        self.notify(&events);
        session
    }

    /// Record activity.  Unknown ids are ignored.
    pub fn touch_session(&self, id: &str) {
        self.touch_at(id, Utc::now());
    }

    fn touch_at(&self, id: &str, now: DateTime<Utc>) {
        let seq = self.next_seq();
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(id) {
            if now > entry.session.last_activity_at {
                entry.session.last_activity_at = now;
            }
            entry.activity_seq = seq;
        }
    }

    /// Count one request against the session (and touch it).
    pub fn count_request(&self, id: &str) {
        let now = Utc::now();
        let seq = self.next_seq();
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(id) {
            entry.session.request_count += 1;
            if now > entry.session.last_activity_at {
                entry.session.last_activity_at = now;
            }
            entry.activity_seq = seq;
        }
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).map(|e| e.session.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Snapshot of every live session, oldest first.
    pub fn get_all_sessions(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self
            .sessions
            .read()
            .values()
            .map(|e| e.session.clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Explicitly close a session.  Listeners see reason `closed`.
    pub fn remove_session(&self, id: &str) -> Option<Session> {
        let entry = self.sessions.write().remove(id)?;
        let event = SessionEvent::Evicted {
            session: entry.session.clone(),
            reason: EvictionReason::Closed,
        };
        self.emit_evicted(&entry.session, EvictionReason::Closed, Utc::now());
        self.notify(std::slice::from_ref(&event));
        Some(entry.session)
    }

    /// Evict every session idle for longer than the timeout.
    pub fn sweep(&self) -> Vec<Session> {
        self.sweep_at(Utc::now())
    }

    /// Sweep against an explicit clock reading.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<Session> {
        let expired: Vec<Session> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, e)| self.is_expired(&e.session, now))
                .map(|(k, _)| k.clone())
                .collect();
            ids.iter()
                .filter_map(|k| sessions.remove(k))
                .map(|e| e.session)
                .collect()
        };

        if expired.is_empty() {
            return expired;
        }

        let events: Vec<SessionEvent> = expired
            .iter()
            .map(|s| {
                self.emit_evicted(s, EvictionReason::Timeout, now);
                SessionEvent::Evicted {
                    session: s.clone(),
                    reason: EvictionReason::Timeout,
                }
            })
            .collect();
        tracing::debug!(evicted = expired.len(), "idle sweep");
        self.notify(&events);
        expired
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep();
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        })
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.last_activity_at)
            .to_std()
            .map(|idle| idle > self.timeout)
            .unwrap_or(false)
    }

    fn emit_evicted(&self, session: &Session, reason: EvictionReason, now: DateTime<Utc>) {
        TraceEvent::SessionEvicted {
            session_id: session.id.clone(),
            reason: reason.as_str().to_owned(),
            idle_ms: now
                .signed_duration_since(session.last_activity_at)
                .num_milliseconds(),
            request_count: session.request_count,
        }
        .emit();
    }

    fn notify(&self, events: &[SessionEvent]) {
        let listeners: Vec<Arc<dyn SessionListener>> = self.listeners.read().clone();
        for event in events {
            for listener in &listeners {
                listener.on_session_event(event);
            }
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(manager: &SessionManager) -> Arc<Mutex<Vec<SessionEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.subscribe(Arc::new(move |e: &SessionEvent| sink.lock().push(e.clone())));
        seen
    }

    fn evictions(seen: &Mutex<Vec<SessionEvent>>) -> Vec<(String, EvictionReason)> {
        seen.lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Evicted { session, reason } => Some((session.id.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mgr = SessionManager::new(Duration::from_secs(60), 10);
        let a = mgr.get_or_create_session("a");
        let again = mgr.get_or_create_session("a");
        assert_eq!(a, again);
        assert_eq!(a.request_count, 0);
        assert_eq!(a.created_at, a.last_activity_at);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn touch_is_monotonic_and_does_not_count() {
        let mgr = SessionManager::new(Duration::from_secs(60), 10);
        let created = mgr.get_or_create_session("a");
        let mut last = created.last_activity_at;
        for _ in 0..5 {
            mgr.touch_session("a");
            let s = mgr.get_session("a").unwrap();
            assert!(s.last_activity_at >= last);
            assert_eq!(s.request_count, 0);
            last = s.last_activity_at;
        }

        // An older clock reading never moves the timestamp back.
        mgr.touch_at("a", created.created_at - chrono::Duration::hours(1));
        assert_eq!(mgr.get_session("a").unwrap().last_activity_at, last);
    }

    #[test]
    fn touch_unknown_is_noop() {
        let mgr = SessionManager::new(Duration::from_secs(60), 10);
        mgr.touch_session("ghost");
        mgr.count_request("ghost");
        assert!(mgr.is_empty());
    }

    #[test]
    fn count_request_increments() {
        let mgr = SessionManager::new(Duration::from_secs(60), 10);
        mgr.get_or_create_session("a");
        mgr.count_request("a");
        mgr.count_request("a");
        assert_eq!(mgr.get_session("a").unwrap().request_count, 2);
    }

    #[test]
    fn sweep_evicts_idle_sessions_once() {
        let mgr = SessionManager::new(Duration::from_secs(60), 10);
        let seen = recorder(&mgr);
        mgr.get_or_create_session("idle");

        let later = Utc::now() + chrono::Duration::seconds(61);
        let evicted = mgr.sweep_at(later);
        assert_eq!(evicted.len(), 1);
        assert!(mgr.get_all_sessions().is_empty());
        assert_eq!(evictions(&seen), vec![("idle".to_string(), EvictionReason::Timeout)]);

        // A second sweep finds nothing new.
        assert!(mgr.sweep_at(later).is_empty());
        assert_eq!(evictions(&seen).len(), 1);
    }

    #[test]
    fn sweep_keeps_recently_touched_sessions() {
        let mgr = SessionManager::new(Duration::from_secs(60), 10);
        mgr.get_or_create_session("busy");
        let soon = Utc::now() + chrono::Duration::seconds(30);
        assert!(mgr.sweep_at(soon).is_empty());
        assert!(mgr.contains("busy"));
    }

    #[test]
    fn capacity_evicts_least_recently_active() {
        let mgr = SessionManager::new(Duration::from_secs(60), 2);
        let seen = recorder(&mgr);
        mgr.get_or_create_session("a");
        mgr.get_or_create_session("b");
        mgr.touch_session("a");

        mgr.get_or_create_session("c");
        assert_eq!(mgr.len(), 2);
        assert!(!mgr.contains("b"));
        assert_eq!(evictions(&seen), vec![("b".to_string(), EvictionReason::Capacity)]);
    }

    #[test]
    fn remove_reports_closed() {
        let mgr = SessionManager::new(Duration::from_secs(60), 10);
        let seen = recorder(&mgr);
        mgr.get_or_create_session("a");
        assert!(mgr.remove_session("a").is_some());
        assert!(mgr.remove_session("a").is_none());
        assert_eq!(evictions(&seen), vec![("a".to_string(), EvictionReason::Closed)]);
    }

    #[test]
    fn listener_may_reenter_manager() {
        let mgr = Arc::new(SessionManager::new(Duration::from_secs(60), 1));
        let weak = Arc::downgrade(&mgr);
        mgr.subscribe(Arc::new(move |e: &SessionEvent| {
            if let Some(m) = weak.upgrade() {
                // Reads the table from inside a notification.
                let _ = m.get_session(e.session_id());
            }
        }));
        mgr.get_or_create_session("a");
        mgr.get_or_create_session("b");
        assert!(mgr.contains("b"));
    }

    #[tokio::test]
    async fn sweeper_task_evicts_and_stops() {
        let mgr = Arc::new(SessionManager::new(Duration::from_millis(20), 10));
        let seen = recorder(&mgr);
        mgr.get_or_create_session("a");

        let cancel = CancellationToken::new();
        let handle = mgr.spawn_sweeper(Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(mgr.is_empty());
        assert_eq!(evictions(&seen), vec![("a".to_string(), EvictionReason::Timeout)]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
