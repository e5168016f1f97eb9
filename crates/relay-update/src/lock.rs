//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Single-slot execution lock keyed on the project root."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Result, UpdateError};

static SLOTS: Lazy<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Serialises update executions against one working copy.
///
/// Every lock built for the same project root shares one slot, so separate
/// service instances in a process cannot advance the same tree concurrently.
#[derive(Debug, Clone)]
pub struct ExecutionLock {
    slot: Arc<AsyncMutex<()>>,
}

/// Held while an execution runs; released on drop.
#[derive(Debug)]
pub struct ExecutionGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ExecutionLock {
    pub fn for_root(root: &Path) -> Self {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let slot = SLOTS
            .lock()
            .entry(root)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Self { slot }
    }

    /// Take the slot or fail with [`UpdateError::InProgress`].
    pub fn try_acquire(&self) -> Result<ExecutionGuard> {
        self.slot
            .clone()
            .try_lock_owned()
            .map(|guard| ExecutionGuard { _guard: guard })
            .map_err(|_| UpdateError::InProgress)
    }

    pub fn is_held(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}
