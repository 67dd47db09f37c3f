//! Transport abstraction for peer compatibility and trust calls.
//!
//! This module provides the boundary to the layer that actually talks to a
//! peer over the network. The engine only needs these calls:
//! - `probe_compatibility()` / `probe_single_host()`: unauthenticated
//!   probes returning reachability plus a [`VersionRelation`]
//! - `heartbeat()`: authenticated liveness and version check
//! - `trust()` / `show_token()`: pairing by numeric token
//! - `notify_exit()` / `notify_remove()`: best-effort notices
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.set_probe_result(HostInfo::new("192.168.1.100", 24), VersionRelation::EqualTo);
//! let found = transport.probe_compatibility(&hosts, &peer_id, 13129).await;
//! ```

mod mock;

pub use mock::{MockTransport, TransportCall};

use async_trait::async_trait;
use clipsync_types::{AppInstanceId, HostInfo, SyncInfo, SyncRuntimeInfo, VersionRelation};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Host could not be reached.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// The answering peer is a different application instance.
    #[error("app instance mismatch")]
    AppInstanceMismatch,

    /// The peer could not decrypt our request.
    #[error("decrypt failed")]
    DecryptFail,

    /// The peer could not encrypt its response for us.
    #[error("encrypt failed")]
    EncryptFail,

    /// The pairing token was not accepted.
    #[error("token rejected")]
    TokenRejected,

    /// Malformed or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the failure means our stored key no longer matches the peer.
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, Self::DecryptFail | Self::EncryptFail)
    }
}

/// A concrete address of a known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    /// The application instance expected to answer.
    pub app_instance_id: AppInstanceId,
    /// Host address in use.
    pub host: String,
    /// Service port.
    pub port: u16,
}

impl PeerEndpoint {
    /// Endpoint of `record`, if it has an address in use.
    pub fn of(record: &SyncRuntimeInfo) -> Option<Self> {
        record.connect_host_address.as_ref().map(|host| Self {
            app_instance_id: record.app_instance_id().clone(),
            host: host.clone(),
            port: record.port,
        })
    }
}

/// Calls the engine makes against peers.
///
/// Implementations own the wire format, encryption and timeouts.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Probe `hosts` for one that answers as `target` and report its version relation.
    ///
    /// Returns `None` if no host is reachable.
    async fn probe_compatibility(
        &self,
        hosts: &[HostInfo],
        target: &AppInstanceId,
        port: u16,
    ) -> Option<(HostInfo, VersionRelation)>;

    /// Probe a single known endpoint.
    async fn probe_single_host(&self, endpoint: &PeerEndpoint) -> Option<VersionRelation>;

    /// Authenticated heartbeat introducing `local` to the peer.
    ///
    /// `Ok(None)` means the peer answered without a usable version.
    async fn heartbeat(
        &self,
        local: &SyncInfo,
        endpoint: &PeerEndpoint,
    ) -> Result<Option<VersionRelation>, TransportError>;

    /// Establish trust using a pairing token.
    async fn trust(&self, endpoint: &PeerEndpoint, token: u32) -> Result<bool, TransportError>;

    /// Ask the peer to display a pairing token.
    async fn show_token(&self, endpoint: &PeerEndpoint) -> Result<bool, TransportError>;

    /// Tell the peer we are shutting down.
    async fn notify_exit(&self, endpoint: &PeerEndpoint) -> Result<(), TransportError>;

    /// Tell the peer we removed it.
    async fn notify_remove(&self, endpoint: &PeerEndpoint) -> Result<(), TransportError>;
}
