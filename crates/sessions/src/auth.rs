//! Centralized, phone-keyed authentication state.
//!
//! A login on one channel becomes visible to live sessions on every
//! other channel: the record is stored under the normalized phone and
//! an [`AuthEvent`] fans out over a broadcast channel. Gateway
//! connections subscribe per-socket; the engine itself only ever reads
//! auth state through the session snapshot taken at turn start.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use pv_domain::trace::{phone_tail, TraceEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records + events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    pub user_id: i64,
    pub phone: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub token: String,
    pub authenticated_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Channels this identity has been seen on.
    pub channels: HashSet<String>,
}

#[derive(Debug, Clone)]
pub enum AuthEvent {
    Login {
        phone: String,
        user_id: i64,
        token: String,
        channel: String,
    },
    Logout {
        phone: String,
        channel: Option<String>,
    },
}

impl AuthEvent {
    pub fn phone(&self) -> &str {
        match self {
            AuthEvent::Login { phone, .. } => phone,
            AuthEvent::Logout { phone, .. } => phone,
        }
    }
}

/// Strip everything but digits; keep the last 10 so `+91` prefixes and
/// bare numbers key the same record.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CentralAuth {
    records: RwLock<HashMap<String, (AuthRecord, Instant)>>,
    ttl: Duration,
    events: broadcast::Sender<AuthEvent>,
}

impl CentralAuth {
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
            events,
        }
    }

    /// Upsert the record and publish a login event.
    pub fn authenticate_user(
        &self,
        phone: &str,
        token: &str,
        user_id: i64,
        first_name: &str,
        channel: &str,
    ) -> AuthRecord {
        let key = normalize_phone(phone);
        let now = Utc::now();

        let mut records = self.records.write();
        let record = match records.get_mut(&key) {
            Some((existing, seen)) => {
                existing.token = token.to_owned();
                existing.user_id = user_id;
                existing.first_name = first_name.to_owned();
                existing.last_active_at = now;
                existing.channels.insert(channel.to_owned());
                *seen = Instant::now();
                existing.clone()
            }
            None => {
                let record = AuthRecord {
                    user_id,
                    phone: key.clone(),
                    first_name: first_name.to_owned(),
                    last_name: None,
                    email: None,
                    token: token.to_owned(),
                    authenticated_at: now,
                    last_active_at: now,
                    channels: HashSet::from([channel.to_owned()]),
                };
                records.insert(key.clone(), (record.clone(), Instant::now()));
                record
            }
        };
        drop(records);

        TraceEvent::AuthEventPublished {
            phone_tail: phone_tail(&key),
            channel: channel.to_owned(),
            login: true,
        }
        .emit();
        let _ = self.events.send(AuthEvent::Login {
            phone: key,
            user_id,
            token: token.to_owned(),
            channel: channel.to_owned(),
        });

        record
    }

    /// Delete the record and publish a logout event. Returns whether a
    /// record existed.
    pub fn logout_user(&self, phone: &str, channel: Option<&str>) -> bool {
        let key = normalize_phone(phone);
        let existed = self.records.write().remove(&key).is_some();
        if existed {
            TraceEvent::AuthEventPublished {
                phone_tail: phone_tail(&key),
                channel: channel.unwrap_or("all").to_owned(),
                login: false,
            }
            .emit();
            let _ = self.events.send(AuthEvent::Logout {
                phone: key,
                channel: channel.map(str::to_owned),
            });
        }
        existed
    }

    /// TTL-refreshing read.
    pub fn get_by_phone(&self, phone: &str) -> Option<AuthRecord> {
        let key = normalize_phone(phone);
        let mut records = self.records.write();
        match records.get_mut(&key) {
            Some((record, seen)) => {
                if seen.elapsed() >= self.ttl {
                    records.remove(&key);
                    return None;
                }
                *seen = Instant::now();
                record.last_active_at = Utc::now();
                Some(record.clone())
            }
            None => None,
        }
    }

    /// Subscribe to login/logout fan-out. Delivery is at-least-once for
    /// live subscribers; receivers must tolerate replays.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Evict expired records. Run from a background sweeper.
    pub fn sweep(&self) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, (_, seen)| seen.elapsed() < self.ttl);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
