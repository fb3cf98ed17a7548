use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::errors::{PatchOpsError, Result};
use crate::models::ComponentId;
use crate::services::catalog::component;

/// Registry of components with an install or uninstall in flight.
#[derive(Clone, Debug, Default)]
pub struct ComponentLocks {
    held: Arc<Mutex<HashSet<ComponentId>>>,
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct ComponentGuard {
    key: ComponentId,
    held: Arc<Mutex<HashSet<ComponentId>>>,
}

impl ComponentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never waits: a held lock yields `Busy` immediately.
    pub fn try_acquire(&self, id: ComponentId) -> Result<ComponentGuard> {
        let key = component(id).lock_key();
        let mut held = self
            .held
            .lock()
            .map_err(|_| PatchOpsError::Config("component lock poisoned".to_string()))?;
        if !held.insert(key) {
            return Err(PatchOpsError::Busy(id));
        }
        Ok(ComponentGuard {
            key,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_locked(&self, id: ComponentId) -> bool {
        let key = component(id).lock_key();
        self.held
            .lock()
            .map(|held| held.contains(&key))
            .unwrap_or(false)
    }
}

impl Drop for ComponentGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
    }
}
