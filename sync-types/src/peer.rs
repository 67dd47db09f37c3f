//! Peer identity and network endpoint types.

use crate::error::TypesError;
use crate::ids::AppInstanceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Operating system descriptor of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    /// OS name, e.g. `Linux`, `Windows`, `Macos`.
    pub name: String,
    /// CPU architecture, e.g. `x86_64`.
    pub arch: String,
    /// Pointer width in bits.
    pub bit_mode: u8,
    /// OS version string.
    pub version: String,
}

impl Platform {
    /// Describe the platform this process runs on.
    pub fn current() -> Self {
        Self {
            name: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            bit_mode: (std::mem::size_of::<usize>() * 8) as u8,
            version: String::new(),
        }
    }
}

/// Who a peer is, independent of where it is on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    /// Application instance identifier.
    pub app_instance_id: AppInstanceId,
    /// Device identifier.
    pub device_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Platform descriptor.
    pub platform: Platform,
    /// Application version.
    pub app_version: String,
}

/// A declared network address of a peer.
///
/// Rendered and parsed in CIDR style: `192.168.1.100/24`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    /// Network prefix length of the interface.
    pub network_prefix_length: u16,
    /// Literal host address.
    pub host_address: String,
}

impl HostInfo {
    /// Create a host info entry.
    pub fn new(host_address: impl Into<String>, network_prefix_length: u16) -> Self {
        Self {
            network_prefix_length,
            host_address: host_address.into(),
        }
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host_address, self.network_prefix_length)
    }
}

impl FromStr for HostInfo {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = s
            .split_once('/')
            .ok_or_else(|| TypesError::InvalidHostInfo(s.to_string()))?;
        let ip: IpAddr = address
            .parse()
            .map_err(|_| TypesError::InvalidHostInfo(s.to_string()))?;
        let prefix: u16 = prefix
            .parse()
            .map_err(|_| TypesError::InvalidHostInfo(s.to_string()))?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(TypesError::InvalidPrefixLength {
                address: address.to_string(),
                prefix,
            });
        }
        Ok(Self::new(address, prefix))
    }
}

/// What a peer announces about itself: identity plus reachable endpoints.
///
/// Produced by discovery or explicit pairing, and by the local process
/// when it introduces itself in heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInfo {
    /// Peer identity.
    pub identity: PeerIdentity,
    /// Declared host addresses.
    pub host_info_list: Vec<HostInfo>,
    /// Declared service port.
    pub port: u16,
}

impl SyncInfo {
    /// The application instance this info describes.
    pub fn app_instance_id(&self) -> &AppInstanceId {
        &self.identity.app_instance_id
    }
}
