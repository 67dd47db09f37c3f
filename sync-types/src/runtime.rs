//! The durable per-peer record and its connection state.

use crate::ids::AppInstanceId;
use crate::peer::{HostInfo, PeerIdentity, SyncInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a peer. Exactly one value per peer at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectState {
    /// No reachable host known.
    #[default]
    Disconnected,
    /// Reachable and compatible, authentication pending.
    Connecting,
    /// Authenticated heartbeat succeeded.
    Connected,
    /// Reachable but speaks a different protocol version.
    Incompatible,
    /// Reachable and compatible but not yet trusted; needs pairing.
    Unverified,
    /// Stored key no longer matches the peer.
    Unmatched,
}

impl ConnectState {
    /// Whether this state counts as disconnected for address tracking.
    pub fn is_disconnected(self) -> bool {
        self == Self::Disconnected
    }
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Incompatible => "INCOMPATIBLE",
            Self::Unverified => "UNVERIFIED",
            Self::Unmatched => "UNMATCHED",
        };
        f.write_str(name)
    }
}

/// Durable record of a known peer.
///
/// `connect_host_address` is the address actually in use; it is either one
/// of `host_info_list` or a previously validated address kept across a
/// port-only change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRuntimeInfo {
    /// Peer identity.
    pub identity: PeerIdentity,
    /// Declared host addresses (multi-homed peers have several).
    pub host_info_list: Vec<HostInfo>,
    /// Declared service port.
    pub port: u16,
    /// User-assigned display name.
    pub note_name: Option<String>,
    /// Whether local content may be sent to this peer.
    pub allow_send: bool,
    /// Whether content from this peer is accepted.
    pub allow_receive: bool,
    /// Current connection state.
    pub connect_state: ConnectState,
    /// Address in use for this peer, if any.
    pub connect_host_address: Option<String>,
    /// Prefix length of the network `connect_host_address` was found on.
    pub connect_network_prefix_length: Option<u16>,
}

impl SyncRuntimeInfo {
    /// Build a fresh record for a newly observed peer.
    pub fn from_sync_info(info: &SyncInfo) -> Self {
        Self {
            identity: info.identity.clone(),
            host_info_list: info.host_info_list.clone(),
            port: info.port,
            note_name: None,
            allow_send: true,
            allow_receive: true,
            connect_state: ConnectState::Disconnected,
            connect_host_address: None,
            connect_network_prefix_length: None,
        }
    }

    /// The key this record is stored under.
    pub fn app_instance_id(&self) -> &AppInstanceId {
        &self.identity.app_instance_id
    }

    /// The address in use as a [`HostInfo`], if known.
    pub fn connect_host_info(&self) -> Option<HostInfo> {
        self.connect_host_address.as_ref().map(|address| {
            HostInfo::new(
                address.clone(),
                self.connect_network_prefix_length.unwrap_or_default(),
            )
        })
    }

    /// Point the record at `host` in the given state.
    pub fn set_connection(&mut self, state: ConnectState, host: Option<&HostInfo>) {
        self.connect_state = state;
        if let Some(host) = host {
            self.connect_host_address = Some(host.host_address.clone());
            self.connect_network_prefix_length = Some(host.network_prefix_length);
        }
    }

    /// Display name: the note name when set, otherwise the device name.
    pub fn display_name(&self) -> &str {
        self.note_name
            .as_deref()
            .unwrap_or(&self.identity.device_name)
    }

    /// Rebuild the peer's announcement from this record.
    pub fn to_sync_info(&self) -> SyncInfo {
        SyncInfo {
            identity: self.identity.clone(),
            host_info_list: self.host_info_list.clone(),
            port: self.port,
        }
    }
}
