//! Peer record storage.
//!
//! The engine never holds peer state of its own: every connection decision
//! is a read-modify-write against a [`PeerStore`], keyed by application
//! instance id. Implementations must make each update linearizable per key.

mod memory;

pub use memory::MemoryPeerStore;

use crate::error::StoreError;
use async_trait::async_trait;
use clipsync_types::{AppInstanceId, SyncInfo, SyncRuntimeInfo};
use tokio::sync::watch;

/// Trait for durable peer record backends.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Subscribe to the full set of peer records.
    ///
    /// The receiver holds the current snapshot and is notified on every change.
    fn stream_all_peers(&self) -> watch::Receiver<Vec<SyncRuntimeInfo>>;

    /// Get a single record.
    async fn get_peer(&self, id: &AppInstanceId) -> Result<Option<SyncRuntimeInfo>, StoreError>;

    /// Write the connection fields of `record`.
    ///
    /// Only `connect_state`, `connect_host_address` and
    /// `connect_network_prefix_length` are written. Returns the id if the
    /// record exists.
    async fn update_connection_fields(
        &self,
        record: &SyncRuntimeInfo,
    ) -> Result<Option<AppInstanceId>, StoreError>;

    /// Write the user-editable fields of `record`.
    ///
    /// Only `note_name`, `allow_send` and `allow_receive` are written.
    /// Returns the id if the record exists.
    async fn update_preference_fields(
        &self,
        record: &SyncRuntimeInfo,
    ) -> Result<Option<AppInstanceId>, StoreError>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete_peer(&self, id: &AppInstanceId) -> Result<(), StoreError>;

    /// Insert a record for a newly announced peer, or merge the announcement
    /// into the existing one. Returns the stored record.
    async fn upsert_sync_info(&self, info: &SyncInfo) -> Result<SyncRuntimeInfo, StoreError>;
}
