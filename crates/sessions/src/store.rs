//! TTL'd in-memory session store.
//!
//! A session is the per-user scratchpad that outlives a single turn:
//! identity, location, cart, the active run pointer, and the pending
//! intent stashed during auth interception. Sessions are ephemeral by
//! contract — an idle TTL refreshed on activity plus an absolute cap.
//!
//! Mutations are compare-and-set on a version integer. Conflicts are
//! expected to be rare (the gateway holds a per-session lock around each
//! turn); a detected conflict is logged and resolved last-write-wins.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pv_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session data
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A user location captured from a share or a typed address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable per-session data. Executors see a read-only snapshot of this
/// under `session.*` in the turn context; only the orchestrator writes
/// it back.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionData {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub location: Option<StoredLocation>,
    #[serde(default)]
    pub cart: Option<serde_json::Value>,
    #[serde(default)]
    pub module_name: Option<String>,
    /// Authoritative pointer to the active flow run, if any.
    #[serde(default)]
    pub active_run_id: Option<Uuid>,
    /// Intent stashed while the auth flow interposes.
    #[serde(default)]
    pub pending_intent: Option<String>,
    /// The utterance that carried the pending intent; replayed when the
    /// stashed flow finally starts.
    #[serde(default)]
    pub pending_intent_text: Option<String>,
    /// System notices ("logged in on another device") queued for the
    /// next turn's reply.
    #[serde(default)]
    pub pending_notices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Phone number or channel-scoped sender id.
    pub identifier: String,
    pub platform: String,
    /// Bumped on every committed write; used for conflict detection.
    pub version: u64,
    pub data: SessionData,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// The snapshot exposed to flows under `session.*`.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(&self.data).unwrap_or_else(|_| serde_json::json!({}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    /// phone → session ids, for cross-channel auth sync.
    by_phone: RwLock<HashMap<String, HashSet<String>>>,
    idle_ttl: Duration,
    absolute_ttl: Duration,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration, absolute_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            by_phone: RwLock::new(HashMap::new()),
            idle_ttl,
            absolute_ttl,
        }
    }

    fn expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let idle = now - session.last_active_at;
        let age = now - session.created_at;
        idle.num_seconds() as u64 >= self.idle_ttl.as_secs()
            || age.num_seconds() as u64 >= self.absolute_ttl.as_secs()
    }

    /// Look up a live session. Expired entries are evicted on access.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(session_id) {
                Some(s) if !self.expired(s, now) => return Some(s.clone()),
                None => return None,
                _ => {}
            }
        }
        self.evict(session_id);
        None
    }

    /// Resolve or create a session. Returns `(session, is_new)`.
    pub fn resolve_or_create(
        &self,
        session_id: &str,
        identifier: &str,
        platform: &str,
    ) -> (Session, bool) {
        if let Some(existing) = self.get(session_id) {
            return (existing, false);
        }

        let now = Utc::now();
        let session = Session {
            session_id: session_id.to_owned(),
            identifier: identifier.to_owned(),
            platform: platform.to_owned(),
            version: 1,
            data: SessionData::default(),
            created_at: now,
            last_active_at: now,
        };
        self.sessions
            .write()
            .insert(session_id.to_owned(), session.clone());

        TraceEvent::SessionResolved {
            session_id: session_id.to_owned(),
            platform: platform.to_owned(),
            is_new: true,
        }
        .emit();

        (session, true)
    }

    /// Commit a session back. Compare-and-set on `version`: a mismatch is
    /// logged and resolved last-write-wins.
    pub fn set(&self, mut session: Session) {
        let mut sessions = self.sessions.write();
        if let Some(current) = sessions.get(&session.session_id) {
            if current.version != session.version {
                TraceEvent::SessionConflict {
                    session_id: session.session_id.clone(),
                    expected_version: session.version,
                    found_version: current.version,
                }
                .emit();
                session.version = current.version;
            }
        }
        session.version += 1;
        session.last_active_at = Utc::now();

        if let Some(phone) = &session.data.phone {
            self.by_phone
                .write()
                .entry(phone.clone())
                .or_default()
                .insert(session.session_id.clone());
        }
        sessions.insert(session.session_id.clone(), session);
    }

    /// Read-modify-write under the store lock. The closure sees the
    /// freshest copy, so this never conflicts.
    pub fn update(&self, session_id: &str, mutate: impl FnOnce(&mut SessionData)) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id)?;
        mutate(&mut session.data);
        session.version += 1;
        session.last_active_at = Utc::now();
        if let Some(phone) = &session.data.phone {
            self.by_phone
                .write()
                .entry(phone.clone())
                .or_default()
                .insert(session_id.to_owned());
        }
        Some(session.clone())
    }

    /// Set a single data field by name (admin/debug surface).
    pub fn set_data(&self, session_id: &str, key: &str, value: serde_json::Value) -> bool {
        self.update(session_id, |data| {
            let mut as_value = serde_json::to_value(&*data).unwrap_or_default();
            if let Some(map) = as_value.as_object_mut() {
                map.insert(key.to_owned(), value);
            }
            if let Ok(updated) = serde_json::from_value(as_value) {
                *data = updated;
            } else {
                tracing::warn!(session_id, key, "set_data produced an invalid session shape");
            }
        })
        .is_some()
    }

    /// Refresh the idle TTL without changing data.
    pub fn touch(&self, session_id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_active_at = Utc::now();
        }
    }

    /// Clear dialog scratch but preserve identity (used by `/reset`).
    pub fn clear_scratch(&self, session_id: &str) -> Option<Session> {
        self.update(session_id, |data| {
            data.cart = None;
            data.module_name = None;
            data.active_run_id = None;
            data.pending_intent = None;
            data.pending_intent_text = None;
            data.pending_notices.clear();
        })
    }

    /// Drop a session entirely.
    pub fn clear(&self, session_id: &str) {
        self.evict(session_id);
    }

    /// Session ids currently linked to a phone number.
    pub fn sessions_for_phone(&self, phone: &str) -> Vec<String> {
        self.by_phone
            .read()
            .get(phone)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Evict every expired session. Run from a background sweeper.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| self.expired(s, now))
                .map(|s| s.session_id.clone())
                .collect()
        };
        for session_id in &expired {
            self.evict(session_id);
        }
        expired.len()
    }

    fn evict(&self, session_id: &str) {
        let removed = self.sessions.write().remove(session_id);
        if let Some(session) = removed {
            if let Some(phone) = &session.data.phone {
                let mut by_phone = self.by_phone.write();
                if let Some(set) = by_phone.get_mut(phone) {
                    set.remove(session_id);
                    if set.is_empty() {
                        by_phone.remove(phone);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(3_600), Duration::from_secs(86_400))
    }

    #[test]
    fn resolve_creates_then_reuses() {
        let store = store();
        let (first, is_new) = store.resolve_or_create("s1", "web:abc", "web");
        assert!(is_new);
        let (second, is_new) = store.resolve_or_create("s1", "web:abc", "web");
        assert!(!is_new);
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn update_bumps_version() {
        let store = store();
        store.resolve_or_create("s1", "web:abc", "web");
        let v1 = store.get("s1").unwrap().version;
        store.update("s1", |data| data.module_name = Some("food".into()));
        let after = store.get("s1").unwrap();
        assert_eq!(after.version, v1 + 1);
        assert_eq!(after.data.module_name.as_deref(), Some("food"));
    }

    #[test]
    fn stale_set_logs_conflict_and_wins() {
        let store = store();
        let (mut stale, _) = store.resolve_or_create("s1", "web:abc", "web");

        // Someone else writes first.
        store.update("s1", |data| data.module_name = Some("food".into()));

        stale.data.module_name = Some("parcel".into());
        store.set(stale);

        // Last write wins; version keeps increasing.
        let current = store.get("s1").unwrap();
        assert_eq!(current.data.module_name.as_deref(), Some("parcel"));
        assert!(current.version >= 3);
    }

    #[test]
    fn update_commutes_with_touch() {
        let store_a = store();
        store_a.resolve_or_create("s1", "web:abc", "web");
        store_a.update("s1", |d| d.module_name = Some("food".into()));
        store_a.touch("s1");
        let a = store_a.get("s1").unwrap();

        let store_b = store();
        store_b.resolve_or_create("s1", "web:abc", "web");
        store_b.touch("s1");
        store_b.update("s1", |d| d.module_name = Some("food".into()));
        let b = store_b.get("s1").unwrap();

        assert_eq!(a.data.module_name, b.data.module_name);
        assert_eq!(a.version, b.version);
    }

    #[test]
    fn idle_expiry_evicts_on_access() {
        let store = SessionStore::new(Duration::from_secs(0), Duration::from_secs(86_400));
        store.resolve_or_create("s1", "web:abc", "web");
        // idle_ttl of zero means immediately expired.
        assert!(store.get("s1").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn phone_index_tracks_sessions() {
        let store = store();
        store.resolve_or_create("s1", "whatsapp:99", "whatsapp");
        store.resolve_or_create("s2", "web:abc", "web");
        store.update("s1", |d| d.phone = Some("9923383838".into()));
        store.update("s2", |d| d.phone = Some("9923383838".into()));

        let mut linked = store.sessions_for_phone("9923383838");
        linked.sort();
        assert_eq!(linked, vec!["s1".to_string(), "s2".to_string()]);

        store.clear("s1");
        assert_eq!(store.sessions_for_phone("9923383838"), vec!["s2".to_string()]);
    }

    #[test]
    fn clear_scratch_preserves_identity() {
        let store = store();
        store.resolve_or_create("s1", "whatsapp:99", "whatsapp");
        store.update("s1", |d| {
            d.phone = Some("9923383838".into());
            d.authenticated = true;
            d.pending_intent = Some("order_food".into());
            d.cart = Some(serde_json::json!({ "items": [1] }));
        });

        store.clear_scratch("s1");
        let after = store.get("s1").unwrap();
        assert!(after.data.authenticated);
        assert_eq!(after.data.phone.as_deref(), Some("9923383838"));
        assert!(after.data.pending_intent.is_none());
        assert!(after.data.cart.is_none());
    }

    #[test]
    fn sweep_removes_expired_sessions() {
        let store = SessionStore::new(Duration::from_secs(0), Duration::from_secs(86_400));
        store.resolve_or_create("s1", "web:a", "web");
        store.resolve_or_create("s2", "web:b", "web");
        assert_eq!(store.sweep(), 2);
        assert!(store.is_empty());
    }
}
