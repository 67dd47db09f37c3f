//! Protocol version comparison.

use crate::error::TypesError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Outcome of comparing the local protocol version against a peer's.
///
/// Read as "the peer's version is ... ours".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionRelation {
    /// Same protocol version.
    EqualTo,
    /// Peer runs an older protocol.
    LowerThan,
    /// Peer runs a newer protocol.
    HigherThan,
}

impl VersionRelation {
    /// Compare two numeric protocol versions.
    pub fn compare(local: u32, remote: u32) -> Self {
        match remote.cmp(&local) {
            Ordering::Equal => Self::EqualTo,
            Ordering::Less => Self::LowerThan,
            Ordering::Greater => Self::HigherThan,
        }
    }

    /// Compare a local protocol version against a version string sent by a peer.
    pub fn compare_str(local: u32, remote: &str) -> Result<Self, TypesError> {
        let remote: u32 = remote
            .trim()
            .parse()
            .map_err(|_| TypesError::InvalidVersion(remote.to_string()))?;
        Ok(Self::compare(local, remote))
    }

    /// Whether both sides speak the same protocol.
    pub fn is_compatible(self) -> bool {
        self == Self::EqualTo
    }
}
