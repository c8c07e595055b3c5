//! Session-scoped string internalization for the binary codec.
//!
//! Payloads from the executor repeat the same short literals on every call
//! (module names, method names, map keys). The table hands out one shared
//! `Arc<str>` per distinct literal for the lifetime of a bridge.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Entries kept before the table stops caching new literals.
pub const DEFAULT_CAPACITY: usize = 4096;

pub struct StringTable {
    entries: Mutex<HashSet<Arc<str>>>,
    capacity: usize,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashSet::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Arc<str>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("String table mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Return the shared copy of `s`, caching it if there is room.
    pub fn internalize(&self, s: &str) -> Arc<str> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(s) {
            return Arc::clone(existing);
        }

        let interned: Arc<str> = Arc::from(s);
        if entries.len() < self.capacity {
            entries.insert(Arc::clone(&interned));
        }
        interned
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached literal. Strings already handed out stay valid.
    pub fn release(&self) {
        let mut entries = self.lock();
        let released = entries.len();
        entries.clear();
        entries.shrink_to_fit();
        tracing::debug!(released, "Released string table");
    }
}
