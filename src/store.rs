//! Shared in-memory key-value storage.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

/// Concurrency-safe map from opaque byte keys to byte values.
///
/// Reads take the shared lock and can proceed together; writes take the
/// exclusive lock. The lock is internal, so the store stays consistent even
/// when called from outside the dispatch loop (the introspection handle
/// does exactly that). No method holds the lock across an await point; all
/// operations are synchronous and atomic per call.
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<HashMap<Bytes, Bytes>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a key. Overwriting with the same value is a no-op in effect.
    pub fn set(&self, key: Bytes, value: Bytes) {
        self.data.write().unwrap().insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.data.read().unwrap().get(key).cloned()
    }

    /// Removes a key, reporting whether it was present.
    pub fn del(&self, key: &[u8]) -> bool {
        self.data.write().unwrap().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
