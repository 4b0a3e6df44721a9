//! Named, TTL-bounded distributed locks over the shared cache.
//!
//! At most one live owner per name at any instant, enforced by the
//! cache's atomic set-if-absent. Release is owner-checked
//! compare-and-delete, so an expired lock reclaimed by another owner is
//! never deleted by the first. Contention is not an error; callers defer
//! to the next tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::Result;
use crate::transport::CacheStore;

/// Build a lock key in the fixed `lock:<action>[<task>][<phase>]` format.
pub fn lock_key(action: &str, task: &str, phase: &str) -> String {
    format!("lock:{action}[{task}][{phase}]")
}

/// Proof of lock ownership. Not RAII: release is an async store call the
/// holder makes explicitly; an unreleased guard simply expires with its
/// TTL.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    owner: String,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct LockManager {
    cache: Arc<dyn CacheStore>,
}

impl LockManager {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        LockManager { cache }
    }

    /// Try to take the named lock. `None` means another owner holds it.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let owner = uuid::Uuid::new_v4().simple().to_string();
        if self.cache.set_nx(name, &owner, ttl).await? {
            debug!(target: "gangway::batch", lock = %name, "lock acquired");
            Ok(Some(LockGuard {
                name: name.to_string(),
                owner,
            }))
        } else {
            Ok(None)
        }
    }

    /// Owner-checked release. Returns false when the entry already
    /// expired and was possibly reclaimed.
    pub async fn release(&self, guard: LockGuard) -> Result<bool> {
        let released = self.cache.delete_if(&guard.name, &guard.owner).await?;
        debug!(target: "gangway::batch", lock = %guard.name, released, "lock released");
        Ok(released)
    }
}
