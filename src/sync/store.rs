//! Key-value store abstraction the reconciler talks to.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;

/// Point-in-time copy of the remote keys under a prefix.
pub type RemoteSnapshot = BTreeMap<String, Vec<u8>>;

/// A remote key-value store.
///
/// `put` must be idempotent and `delete` of an absent key must succeed.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Every key under `prefix`, with its value.
    async fn list(&self, prefix: &str) -> Result<RemoteSnapshot, StoreError>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process store with optional injected write failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
            failing: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make every write to `key` fail.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.lock_failing().insert(key.into());
    }

    /// Copy of the whole store.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock_entries().clone()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.failing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, method: &'static str, key: &str) -> Result<(), StoreError> {
        if self.lock_failing().contains(key) {
            return Err(StoreError::Status {
                method,
                key: key.to_string(),
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<RemoteSnapshot, StoreError> {
        Ok(self
            .lock_entries()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check("PUT", key)?;
        self.lock_entries().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check("DELETE", key)?;
        self.lock_entries().remove(key);
        Ok(())
    }
}
