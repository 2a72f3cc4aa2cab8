//! In-memory session store.
//!
//! Session ids are the SHA-256 hex digest of a fresh random UUID, so they
//! are opaque and unguessable without being reversible to the UUID. The
//! store map is sharded (`DashMap`); each session serializes its own
//! key/value mutations behind a per-session lock, keeping store traffic and
//! session traffic from contending with each other.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct SessionInner {
    last_access: DateTime<Utc>,
    values: HashMap<String, String>,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            inner: Mutex::new(SessionInner {
                last_access: now,
                values: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.inner.lock().expect("session lock poisoned").last_access
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .values
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .values
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .values
            .remove(key)
    }

    fn touch(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if now > inner.last_access {
            inner.last_access = now;
        }
    }

    fn expired_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_access() > timeout
    }
}

fn fresh_session_id() -> String {
    let digest = Sha256::digest(Uuid::new_v4().to_string().as_bytes());
    let mut id = String::with_capacity(64);
    for byte in digest {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(timeout: StdDuration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::minutes(30)),
        }
    }

    /// Create and register a fresh session.
    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(fresh_session_id(), Utc::now()));
        self.sessions
            .insert(session.id().to_string(), session.clone());
        session
    }

    /// Look up a live session, refreshing its last-access time. An expired
    /// session is evicted on the spot and reported as absent.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<Session>> {
        self.get_by_id_at(id, Utc::now())
    }

    /// Clock-injected variant of [`get_by_id`](Self::get_by_id).
    pub fn get_by_id_at(&self, id: &str, now: DateTime<Utc>) -> Option<Arc<Session>> {
        let session = self.sessions.get(id)?.clone();
        if session.expired_at(now, self.timeout) {
            drop(self.sessions.remove(id));
            return None;
        }
        session.touch(now);
        Some(session)
    }

    /// Remove a session outright (logout, compromise).
    pub fn invalidate(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Evict every expired session; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.expired_at(now, self.timeout));
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!(dropped, "swept expired sessions");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Run the periodic sweep until the token is cancelled.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    interval: StdDuration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    store.sweep();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_64_hex_and_unique() {
        let store = SessionStore::new(StdDuration::from_secs(60));
        let a = store.create();
        let b = store.create();
        assert_eq!(a.id().len(), 64);
        assert!(a.id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn values_round_trip_within_a_session() {
        let store = SessionStore::new(StdDuration::from_secs(60));
        let session = store.create();
        session.set("user", "alice");
        assert_eq!(session.get("user").as_deref(), Some("alice"));
        assert_eq!(session.remove("user").as_deref(), Some("alice"));
        assert_eq!(session.get("user"), None);
    }

    #[test]
    fn expired_session_is_evicted_on_access() {
        let store = SessionStore::new(StdDuration::from_secs(60));
        let session = store.create();
        let id = session.id().to_string();
        let later = Utc::now() + Duration::seconds(61);
        assert!(store.get_by_id_at(&id, later).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn access_refreshes_expiry() {
        let store = SessionStore::new(StdDuration::from_secs(60));
        let id = store.create().id().to_string();
        let t1 = Utc::now() + Duration::seconds(50);
        assert!(store.get_by_id_at(&id, t1).is_some());
        // 50s after the refreshed access, still within the 60s timeout.
        let t2 = t1 + Duration::seconds(50);
        assert!(store.get_by_id_at(&id, t2).is_some());
    }

    #[test]
    fn last_access_never_moves_backwards() {
        let store = SessionStore::new(StdDuration::from_secs(600));
        let session = store.create();
        let id = session.id().to_string();
        let past = Utc::now() - Duration::seconds(30);
        store.get_by_id_at(&id, past);
        assert!(session.last_access() >= past + Duration::seconds(30) - Duration::seconds(1));
    }

    #[test]
    fn invalidate_removes_entry() {
        let store = SessionStore::new(StdDuration::from_secs(60));
        let id = store.create().id().to_string();
        assert!(store.invalidate(&id));
        assert!(!store.invalidate(&id));
        assert!(store.get_by_id(&id).is_none());
    }

    #[test]
    fn sweep_drops_only_expired_sessions() {
        let store = SessionStore::new(StdDuration::from_secs(60));
        let stale = store.create();
        let fresh = store.create();
        let now = Utc::now() + Duration::seconds(61);
        fresh.touch(now);
        assert_eq!(store.sweep_at(now + Duration::seconds(1)), 1);
        assert!(store.get_by_id_at(fresh.id(), now + Duration::seconds(2)).is_some());
        assert!(store
            .get_by_id_at(stale.id(), now + Duration::seconds(2))
            .is_none());
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancellation() {
        let store = Arc::new(SessionStore::new(StdDuration::from_secs(60)));
        let token = CancellationToken::new();
        let handle = spawn_sweeper(store, StdDuration::from_millis(10), token.clone());
        token.cancel();
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[test]
    fn concurrent_mutation_is_consistent() {
        let store = Arc::new(SessionStore::new(StdDuration::from_secs(60)));
        let session = store.create();
        let mut handles = Vec::new();
        for i in 0..8 {
            let session = session.clone();
            handles.push(std::thread::spawn(move || {
                for n in 0..100 {
                    session.set(&format!("k{i}"), format!("v{n}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..8 {
            assert_eq!(session.get(&format!("k{i}")).as_deref(), Some("v99"));
        }
    }
}
