//! Key-value store abstraction
//!
//! Every operation is synchronous and durable before it returns. Async callers go through
//! [`crate::SessionState`], which moves writes onto the blocking pool.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::error::Result;

/// Durable key-value persistence for collector lifecycle state
pub trait StateStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Apply every pair atomically: after a crash either all or none are visible
    fn write_batch(&self, entries: &[(&[u8], &[u8])]) -> Result<()>;
}

/// Volatile store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`
    pub fn with_entries(entries: &[(&[u8], &[u8])]) -> Self {
        let store = Self::new();
        {
            let mut map = store.entries.lock();
            for (key, value) in entries {
                map.insert(key.to_vec(), Bytes::copy_from_slice(value));
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn write_batch(&self, entries: &[(&[u8], &[u8])]) -> Result<()> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert(key.to_vec(), Bytes::copy_from_slice(value));
        }
        Ok(())
    }
}
