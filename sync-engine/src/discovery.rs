//! Boundary to the local network discovery service.

use async_trait::async_trait;
use clipsync_types::{AppInstanceId, HostInfo};
use std::sync::{Arc, Mutex};

/// Discovery service that broadcasts presence and resolves peer addresses.
///
/// Results come back into the engine as announcements through
/// `SyncManager::update_sync_info`, not as return values.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Ask discovery to re-resolve the addresses of `id`.
    async fn refresh_target(&self, id: &AppInstanceId, host_info_list: &[HostInfo]);
}

/// Discovery that only records refresh requests.
#[derive(Debug, Default, Clone)]
pub struct MockDiscovery {
    refreshed: Arc<Mutex<Vec<(AppInstanceId, Vec<HostInfo>)>>>,
}

impl MockDiscovery {
    /// Create a new mock discovery.
    pub fn new() -> Self {
        Self::default()
    }

    /// All refresh requests so far.
    pub fn refreshed(&self) -> Vec<(AppInstanceId, Vec<HostInfo>)> {
        self.refreshed.lock().unwrap().clone()
    }

    /// Number of refresh requests for `id`.
    pub fn refresh_count(&self, id: &AppInstanceId) -> usize {
        self.refreshed
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| target == id)
            .count()
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn refresh_target(&self, id: &AppInstanceId, host_info_list: &[HostInfo]) {
        self.refreshed
            .lock()
            .unwrap()
            .push((id.clone(), host_info_list.to_vec()));
    }
}
