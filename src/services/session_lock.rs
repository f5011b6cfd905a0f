use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per session id, created on demand and dropped once the
/// last holder or waiter lets go. Unrelated sessions never contend.
#[derive(Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

pub struct SessionGuard {
    session_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeout {
    pub session_id: Uuid,
    pub waited: Duration,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits at most `wait` for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: Uuid, wait: Duration) -> Result<SessionGuard, LockTimeout> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(session_id).or_default().clone()
        };

        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => Ok(SessionGuard {
                session_id,
                guard: Some(guard),
                locks: Arc::clone(&self.locks),
            }),
            Err(_) => {
                tracing::warn!(%session_id, waited_ms = wait.as_millis() as u64, "session lock wait exceeded");
                // The timed-out future is already dropped, so only live waiters hold clones.
                release_entry(&self.locks, session_id);
                Err(LockTimeout { session_id, waited: wait })
            }
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.locks.lock().len()
    }

    /// True while some caller holds the lock for `session_id`.
    pub fn is_held(&self, session_id: Uuid) -> bool {
        self.locks
            .lock()
            .get(&session_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();
        release_entry(&self.locks, self.session_id);
    }
}

fn release_entry(locks: &Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>, session_id: Uuid) {
    let mut locks = locks.lock();
    if locks
        .get(&session_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(&session_id);
    }
}
