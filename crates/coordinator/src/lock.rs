//! Lock manager
//!
//! Tracks which transactions hold locks on which resources and enforces
//! shared/exclusive compatibility. Acquisition never blocks: a conflict
//! fails immediately with `AcquireLockFailed`, which keeps the protocol
//! deadlock-free and leaves retry to the client.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use notiondb_common::{Error, Result};

/// Lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared lock for reading; any number of concurrent holders
    Shared,
    /// Exclusive lock for writing; excludes every other holder
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Per-resource lists of `(transaction, mode)` holders behind one mutex.
/// The mutex is held only while the table is inspected or mutated; there is
/// no waiting inside the manager.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Vec<(Uuid, LockMode)>>>,
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager::default()
    }

    /// Try to acquire a lock on a resource.
    ///
    /// Rules: any number of SHARED holders may coexist; EXCLUSIVE excludes
    /// all others; a transaction already holding SHARED may upgrade to
    /// EXCLUSIVE iff it is the sole holder; re-acquiring a lock the
    /// transaction already holds is idempotent. Conflicts fail immediately.
    pub fn acquire(&self, resource: &str, tid: Uuid, mode: LockMode) -> Result<()> {
        let mut locks = self.locks.lock();
        let holders = locks.entry(resource.to_owned()).or_default();

        if holders.is_empty() {
            holders.push((tid, mode));
            return Ok(());
        }

        // idempotent re-acquire; an exclusive lock also satisfies shared
        if holders.iter().any(|&(holder, held)| {
            holder == tid && (held == mode || held == LockMode::Exclusive)
        }) {
            return Ok(());
        }

        match mode {
            LockMode::Shared => {
                if holders.iter().all(|&(_, held)| held == LockMode::Shared) {
                    holders.push((tid, mode));
                    return Ok(());
                }
            }
            LockMode::Exclusive => {
                // sole-holder upgrade
                if holders.iter().all(|&(holder, _)| holder == tid) {
                    holders.clear();
                    holders.push((tid, LockMode::Exclusive));
                    return Ok(());
                }
            }
        }

        let conflicting: Vec<Uuid> = holders
            .iter()
            .filter(|&&(holder, _)| holder != tid)
            .map(|&(holder, _)| holder)
            .collect();
        tracing::debug!(resource, %tid, %mode, "lock conflict");
        Err(Error::AcquireLockFailed {
            resource: resource.to_owned(),
            holders: conflicting,
        })
    }

    /// Releases every lock held by the transaction in one pass.
    pub fn release(&self, tid: Uuid) {
        let mut locks = self.locks.lock();
        locks.retain(|_, holders| {
            holders.retain(|&(holder, _)| holder != tid);
            !holders.is_empty()
        });
    }

    /// Whether the transaction holds the given lock. An exclusive lock
    /// satisfies a shared check.
    pub fn holds(&self, resource: &str, tid: Uuid, mode: LockMode) -> bool {
        let locks = self.locks.lock();
        locks
            .get(resource)
            .map(|holders| {
                holders.iter().any(|&(holder, held)| {
                    holder == tid && (held == mode || held == LockMode::Exclusive)
                })
            })
            .unwrap_or(false)
    }

    /// The current holders of a resource.
    pub fn holders(&self, resource: &str) -> Vec<(Uuid, LockMode)> {
        self.locks.lock().get(resource).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_many_shared_holders() {
        let manager = LockManager::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        manager.acquire("students", a, LockMode::Shared).unwrap();
        manager.acquire("students", b, LockMode::Shared).unwrap();
        manager.acquire("students", c, LockMode::Shared).unwrap();
        assert_eq!(manager.holders("students").len(), 3);
    }

    #[test]
    fn test_exclusive_excludes_everyone() {
        let manager = LockManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        manager.acquire("students", a, LockMode::Exclusive).unwrap();

        let err = manager
            .acquire("students", b, LockMode::Exclusive)
            .unwrap_err();
        match err {
            Error::AcquireLockFailed { resource, holders } => {
                assert_eq!(resource, "students");
                assert_eq!(holders, vec![a]);
            }
            other => panic!("expected AcquireLockFailed, got {other:?}"),
        }
        assert!(manager
            .acquire("students", b, LockMode::Shared)
            .is_err());
    }

    #[test]
    fn test_shared_blocks_exclusive_from_others() {
        let manager = LockManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        manager.acquire("students", a, LockMode::Shared).unwrap();
        assert!(manager
            .acquire("students", b, LockMode::Exclusive)
            .is_err());
    }

    #[test]
    fn test_sole_holder_upgrade() {
        let manager = LockManager::new();
        let a = Uuid::new_v4();
        manager.acquire("students", a, LockMode::Shared).unwrap();
        manager.acquire("students", a, LockMode::Exclusive).unwrap();
        assert!(manager.holds("students", a, LockMode::Exclusive));
    }

    #[test]
    fn test_upgrade_fails_with_other_readers() {
        let manager = LockManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        manager.acquire("students", a, LockMode::Shared).unwrap();
        manager.acquire("students", b, LockMode::Shared).unwrap();
        assert!(manager
            .acquire("students", a, LockMode::Exclusive)
            .is_err());
    }

    #[test]
    fn test_reacquire_is_idempotent() {
        let manager = LockManager::new();
        let a = Uuid::new_v4();
        manager.acquire("students", a, LockMode::Shared).unwrap();
        manager.acquire("students", a, LockMode::Shared).unwrap();
        assert_eq!(manager.holders("students").len(), 1);

        manager.acquire("students", a, LockMode::Exclusive).unwrap();
        // shared re-acquire is satisfied by the exclusive lock
        manager.acquire("students", a, LockMode::Shared).unwrap();
        assert_eq!(manager.holders("students").len(), 1);
    }

    #[test]
    fn test_release_frees_all_resources_in_one_pass() {
        let manager = LockManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        manager.acquire("students", a, LockMode::Exclusive).unwrap();
        manager.acquire("courses", a, LockMode::Shared).unwrap();
        manager.release(a);
        assert!(manager.holders("students").is_empty());
        manager.acquire("students", b, LockMode::Exclusive).unwrap();
    }

    #[test]
    fn test_no_incompatible_modes_coexist() {
        let manager = LockManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        manager.acquire("t", a, LockMode::Shared).unwrap();
        let _ = manager.acquire("t", b, LockMode::Exclusive);
        let holders = manager.holders("t");
        let exclusive = holders.iter().filter(|(_, m)| *m == LockMode::Exclusive).count();
        assert!(exclusive == 0 || holders.len() == 1);
    }
}
