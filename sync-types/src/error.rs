//! Error types for clipsync data types.

use thiserror::Error;

/// Errors produced while building or parsing clipsync types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Host info string was not of the form `address/prefix`.
    #[error("invalid host info: {0}")]
    InvalidHostInfo(String),

    /// Network prefix length out of range for the address family.
    #[error("invalid network prefix length {prefix} for {address}")]
    InvalidPrefixLength {
        /// The host address.
        address: String,
        /// The rejected prefix length.
        prefix: u16,
    },

    /// Protocol version string could not be parsed.
    #[error("invalid protocol version: {0}")]
    InvalidVersion(String),
}
