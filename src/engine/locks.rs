// src/engine/locks.rs

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Held by whoever owns a package (a walker or a decision being applied).
pub type PackageGuard = OwnedMutexGuard<()>;

/// Per-package ownership registry: at most one owner per package UUID.
#[derive(Debug, Clone, Default)]
pub struct PackageLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl PackageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, package: Uuid) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.inner.lock().entry(package).or_default())
    }

    /// `None` if the package is owned by someone else.
    pub fn try_acquire(&self, package: Uuid) -> Option<PackageGuard> {
        self.slot(package).try_lock_owned().ok()
    }

    pub fn is_held(&self, package: Uuid) -> bool {
        self.inner
            .lock()
            .get(&package)
            .is_some_and(|m| m.try_lock().is_err())
    }

    /// Forget slots nobody holds or waits on.
    pub fn prune(&self) {
        self.inner
            .lock()
            .retain(|_, slot| Arc::strong_count(slot) > 1 || slot.try_lock().is_err());
    }
}
