use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::BackendType;
use crate::errno::Errno;

/// Capacity of the backend registry.
pub(crate) const MAX_BACKENDS: usize = 8;

/// Table mapping backend type names to factories.
///
/// Registration is append-only for the life of a VFS instance; shutdown
/// clears the table. The lock is leaf-level and never held across a backend
/// call.
pub(crate) struct BackendRegistry {
    entries: Mutex<Vec<Arc<dyn BackendType>>>,
}

impl BackendRegistry {
    pub(crate) fn new() -> BackendRegistry {
        BackendRegistry {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registers a backend type. Fails with `EEXIST` when the name is taken
    /// and `ENOMEM` when the table is full.
    pub(crate) fn register(&self, ops: Arc<dyn BackendType>) -> Result<(), Errno> {
        if ops.name().is_empty() {
            return Err(Errno::EINVAL);
        }
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.name() == ops.name()) {
            return Err(Errno::EEXIST);
        }
        if entries.len() >= MAX_BACKENDS {
            return Err(Errno::ENOMEM);
        }
        entries.push(ops);
        Ok(())
    }

    /// Looks a backend type up by name.
    pub(crate) fn find(&self, name: &str) -> Option<Arc<dyn BackendType>> {
        let entries = self.entries.lock();
        entries.iter().find(|e| e.name() == name).cloned()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}
