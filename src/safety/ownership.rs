/// Single-owner control token.
/// At most one session controls a process-control engine at a time. A session
/// acquires the engine's [`ControlLock`] before any controlled operation and
/// every privileged operation verifies the token it holds. Contention fails
/// immediately instead of queueing.
use crate::config::types::{ProbeError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use uuid::Uuid;

/// Process-wide lock used by engines that do not supply their own
static GLOBAL_CONTROL_LOCK: OnceLock<ControlLock> = OnceLock::new();

/// Identity of one session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

#[derive(Debug, Default)]
struct LockState {
    owner: Mutex<Option<SessionId>>,
    acquisitions: AtomicU64,
    contentions: AtomicU64,
}

/// Shared single-owner lock for one engine
#[derive(Clone, Debug, Default)]
pub struct ControlLock {
    state: Arc<LockState>,
}

impl ControlLock {
    /// A lock private to one engine instance
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide lock
    pub fn global() -> Self {
        GLOBAL_CONTROL_LOCK.get_or_init(ControlLock::new).clone()
    }

    fn owner_slot(&self) -> MutexGuard<'_, Option<SessionId>> {
        // The slot holds a plain value, a poisoned guard is still consistent
        self.state
            .owner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take ownership for `session`, or fail if anyone else holds it
    pub fn try_acquire(&self, session: SessionId) -> Result<OwnershipToken> {
        let mut owner = self.owner_slot();
        match *owner {
            Some(current) if current == session => Err(ProbeError::usage(format!(
                "session {} already controls this engine",
                session
            ))),
            Some(current) => {
                self.state.contentions.fetch_add(1, Ordering::Relaxed);
                Err(ProbeError::usage(format!(
                    "another session ({}) already controls this engine",
                    current
                )))
            }
            None => {
                *owner = Some(session);
                self.state.acquisitions.fetch_add(1, Ordering::Relaxed);
                debug!("Control lock acquired by session {}", session);
                Ok(OwnershipToken {
                    lock: self.clone(),
                    session,
                    released: false,
                })
            }
        }
    }

    pub fn owner(&self) -> Option<SessionId> {
        *self.owner_slot()
    }

    pub fn is_held_by(&self, session: SessionId) -> bool {
        self.owner() == Some(session)
    }

    pub fn is_same_lock(&self, other: &ControlLock) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn acquisitions(&self) -> u64 {
        self.state.acquisitions.load(Ordering::Relaxed)
    }

    pub fn contentions(&self) -> u64 {
        self.state.contentions.load(Ordering::Relaxed)
    }

    fn release(&self, session: SessionId) {
        let mut owner = self.owner_slot();
        if *owner == Some(session) {
            *owner = None;
            debug!("Control lock released by session {}", session);
        } else {
            warn!(
                "Session {} released a control lock it does not hold (owner: {:?})",
                session, *owner
            );
        }
    }
}

/// Proof of ownership, released on drop
#[derive(Debug)]
pub struct OwnershipToken {
    lock: ControlLock,
    session: SessionId,
    released: bool,
}

impl OwnershipToken {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Check this token still owns `lock`
    pub fn verify(&self, lock: &ControlLock) -> Result<()> {
        if self.released || !self.lock.is_same_lock(lock) || !lock.is_held_by(self.session) {
            return Err(ProbeError::usage(format!(
                "session {} does not control this engine",
                self.session
            )));
        }
        Ok(())
    }

    /// Give up ownership explicitly
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.release(self.session);
        }
    }
}

impl Drop for OwnershipToken {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_owner() {
        let lock = ControlLock::new();
        let first = SessionId::new();
        let second = SessionId::new();

        let token = lock.try_acquire(first).unwrap();
        assert!(lock.is_held_by(first));

        let err = lock.try_acquire(second).unwrap_err();
        assert!(matches!(err, ProbeError::Usage(_)));
        assert_eq!(lock.contentions(), 1);

        drop(token);
        assert_eq!(lock.owner(), None);
        assert!(lock.try_acquire(second).is_ok());
    }

    #[test]
    fn test_token_verification() {
        let lock = ControlLock::new();
        let other = ControlLock::new();
        let token = lock.try_acquire(SessionId::new()).unwrap();
        assert!(token.verify(&lock).is_ok());
        assert!(token.verify(&other).is_err());
    }

    #[test]
    fn test_explicit_release() {
        let lock = ControlLock::new();
        let session = SessionId::new();
        let token = lock.try_acquire(session).unwrap();
        token.release();
        assert!(!lock.is_held_by(session));
        assert_eq!(lock.acquisitions(), 1);
    }

    #[test]
    fn test_global_lock_is_shared() {
        assert!(ControlLock::global().is_same_lock(&ControlLock::global()));
        assert!(!ControlLock::new().is_same_lock(&ControlLock::new()));
    }
}
