//! Non-blocking exclusive lock of a link channel.
//!
//! Acquisition either succeeds at once or fails with the current owner; it
//! never queues. Ownership is released when the [`LinkLockGuard`] is dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one caller session (one adapter instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type OwnerSlot = Arc<Mutex<Option<SessionId>>>;

fn slot(owner: &OwnerSlot) -> MutexGuard<'_, Option<SessionId>> {
    // The slot holds a plain Option; a panic elsewhere cannot leave it torn.
    owner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub(crate) struct LinkLock {
    owner: OwnerSlot,
}

impl LinkLock {
    /// Take the lock for `session`, or return the session holding it.
    ///
    /// Not reentrant: a session that already holds the lock is refused too.
    pub(crate) fn try_acquire(&self, session: SessionId) -> Result<LinkLockGuard, SessionId> {
        let mut owner = slot(&self.owner);
        if let Some(current) = *owner {
            return Err(current);
        }
        *owner = Some(session);
        Ok(LinkLockGuard {
            owner: Arc::clone(&self.owner),
            session,
        })
    }

    pub(crate) fn owner(&self) -> Option<SessionId> {
        *slot(&self.owner)
    }
}

/// RAII guard for exclusive link access
///
/// Holds the link lock for one session. Dropping the guard releases it,
/// including when the holder unwinds.
#[derive(Debug)]
pub struct LinkLockGuard {
    owner: OwnerSlot,
    session: SessionId,
}

impl LinkLockGuard {
    /// Session that owns this guard
    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl Drop for LinkLockGuard {
    fn drop(&mut self) {
        let mut owner = slot(&self.owner);
        if *owner == Some(self.session) {
            tracing::trace!(session = %self.session, "Releasing link lock");
            *owner = None;
        }
    }
}
