//! In-memory peer store.

use super::PeerStore;
use crate::error::StoreError;
use async_trait::async_trait;
use clipsync_core::merge_sync_info;
use clipsync_types::{AppInstanceId, SyncInfo, SyncRuntimeInfo};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Peer store backed by a map, publishing snapshots through a watch channel.
///
/// Snapshots are ordered by application instance id. A snapshot is only
/// published when a write actually changed something.
#[derive(Debug)]
pub struct MemoryPeerStore {
    records: Mutex<BTreeMap<AppInstanceId, SyncRuntimeInfo>>,
    snapshots: watch::Sender<Vec<SyncRuntimeInfo>>,
}

impl MemoryPeerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            records: Mutex::new(BTreeMap::new()),
            snapshots,
        }
    }

    /// Create a store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = SyncRuntimeInfo>) -> Self {
        let store = Self::new();
        {
            let mut map = store
                .records
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for record in records {
                map.insert(record.app_instance_id().clone(), record);
            }
            store.publish(&map);
        }
        store
    }

    /// Insert or replace a whole record.
    pub fn insert(&self, record: SyncRuntimeInfo) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        map.insert(record.app_instance_id().clone(), record);
        self.publish(&map);
        Ok(())
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<AppInstanceId, SyncRuntimeInfo>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    fn publish(&self, map: &BTreeMap<AppInstanceId, SyncRuntimeInfo>) {
        self.snapshots.send_replace(map.values().cloned().collect());
    }

    fn modify(
        &self,
        id: &AppInstanceId,
        apply: impl FnOnce(&mut SyncRuntimeInfo) -> bool,
    ) -> Result<Option<AppInstanceId>, StoreError> {
        let mut map = self.lock()?;
        let Some(stored) = map.get_mut(id) else {
            return Ok(None);
        };
        if apply(stored) {
            self.publish(&map);
        }
        Ok(Some(id.clone()))
    }
}

impl Default for MemoryPeerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerStore for MemoryPeerStore {
    fn stream_all_peers(&self) -> watch::Receiver<Vec<SyncRuntimeInfo>> {
        self.snapshots.subscribe()
    }

    async fn get_peer(&self, id: &AppInstanceId) -> Result<Option<SyncRuntimeInfo>, StoreError> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn update_connection_fields(
        &self,
        record: &SyncRuntimeInfo,
    ) -> Result<Option<AppInstanceId>, StoreError> {
        self.modify(record.app_instance_id(), |stored| {
            let changed = stored.connect_state != record.connect_state
                || stored.connect_host_address != record.connect_host_address
                || stored.connect_network_prefix_length != record.connect_network_prefix_length;
            stored.connect_state = record.connect_state;
            stored.connect_host_address = record.connect_host_address.clone();
            stored.connect_network_prefix_length = record.connect_network_prefix_length;
            changed
        })
    }

    async fn update_preference_fields(
        &self,
        record: &SyncRuntimeInfo,
    ) -> Result<Option<AppInstanceId>, StoreError> {
        self.modify(record.app_instance_id(), |stored| {
            let changed = stored.note_name != record.note_name
                || stored.allow_send != record.allow_send
                || stored.allow_receive != record.allow_receive;
            stored.note_name = record.note_name.clone();
            stored.allow_send = record.allow_send;
            stored.allow_receive = record.allow_receive;
            changed
        })
    }

    async fn delete_peer(&self, id: &AppInstanceId) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        if map.remove(id).is_some() {
            self.publish(&map);
        }
        Ok(())
    }

    async fn upsert_sync_info(&self, info: &SyncInfo) -> Result<SyncRuntimeInfo, StoreError> {
        let mut map = self.lock()?;
        let id = info.app_instance_id().clone();
        let (record, changed) = match map.get_mut(&id) {
            Some(stored) => {
                let changed = merge_sync_info(stored, info);
                (stored.clone(), changed)
            }
            None => {
                let record = SyncRuntimeInfo::from_sync_info(info);
                map.insert(id, record.clone());
                (record, true)
            }
        };
        if changed {
            self.publish(&map);
        }
        Ok(record)
    }
}
