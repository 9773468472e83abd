//! Per-session concurrency control.
//!
//! The hard rule is one in-flight turn per session: each session key
//! maps to a `Semaphore(1)`; a second message queues behind the holder
//! for a bounded wait and is rejected with a "please wait" reply on
//! timeout. Across sessions everything runs in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// The bounded wait expired while another turn held the lock.
#[derive(Debug)]
pub struct LockTimeout;

impl std::fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session is busy — a turn is already in progress")
    }
}

impl std::error::Error for LockTimeout {}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a session, waiting at most `wait`.
    /// Hold the permit for the duration of the turn — it releases on
    /// drop.
    pub async fn acquire(
        &self,
        session_id: &str,
        wait: Duration,
    ) -> Result<OwnedSemaphorePermit, LockTimeout> {
        let semaphore = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        match tokio::time::timeout(wait, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            _ => Err(LockTimeout),
        }
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove locks nobody currently holds (background sweeper).
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, semaphore| semaphore.available_permits() == 0);
    }
}
