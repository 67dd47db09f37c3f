//! Per-peer public key storage.
//!
//! A stored key means we have paired with the peer before and may send it
//! authenticated heartbeats. Keys are deleted when they stop matching or
//! when the peer is removed.

use crate::error::StoreError;
use async_trait::async_trait;
use clipsync_types::AppInstanceId;
use dashmap::DashMap;

/// Trait for public key storage backends.
///
/// Deletion must be atomic per id so that a concurrent resolution never
/// observes a half-deleted key.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Whether a public key is on file for `id`.
    async fn has_public_key(&self, id: &AppInstanceId) -> Result<bool, StoreError>;

    /// Delete the public key for `id`. Returns whether one was present.
    async fn delete_public_key(&self, id: &AppInstanceId) -> Result<bool, StoreError>;
}

/// In-memory secure store.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    keys: DashMap<AppInstanceId, Vec<u8>>,
}

impl MemorySecureStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Save (or replace) the public key for `id`.
    pub fn save_public_key(&self, id: AppInstanceId, key: Vec<u8>) {
        self.keys.insert(id, key);
    }

    /// Whether a key is present, without going through the async trait.
    pub fn contains(&self, id: &AppInstanceId) -> bool {
        self.keys.contains_key(id)
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn has_public_key(&self, id: &AppInstanceId) -> Result<bool, StoreError> {
        Ok(self.keys.contains_key(id))
    }

    async fn delete_public_key(&self, id: &AppInstanceId) -> Result<bool, StoreError> {
        Ok(self.keys.remove(id).is_some())
    }
}
