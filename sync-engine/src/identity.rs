//! Local identity used when introducing ourselves to peers.

use clipsync_types::SyncInfo;

/// Produces the local [`SyncInfo`] sent in heartbeats.
///
/// Called per heartbeat so implementations can reflect the current network
/// interfaces and port.
pub trait SyncInfoFactory: Send + Sync {
    /// Describe this application instance as it is right now.
    fn create_sync_info(&self) -> SyncInfo;
}

/// Factory returning a fixed description.
#[derive(Debug, Clone)]
pub struct StaticSyncInfoFactory {
    info: SyncInfo,
}

impl StaticSyncInfoFactory {
    /// Always answer with `info`.
    pub fn new(info: SyncInfo) -> Self {
        Self { info }
    }
}

impl SyncInfoFactory for StaticSyncInfoFactory {
    fn create_sync_info(&self) -> SyncInfo {
        self.info.clone()
    }
}
