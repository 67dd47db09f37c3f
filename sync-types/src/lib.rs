//! # sync-types
//!
//! Data model for the clipsync device synchronization engine.
//!
//! This crate provides the foundational types used across all clipsync crates:
//! - [`AppInstanceId`] - Stable identity of an installed application instance
//! - [`PeerIdentity`], [`Platform`], [`HostInfo`], [`SyncInfo`] - What a peer announces
//! - [`SyncRuntimeInfo`], [`ConnectState`] - The durable per-peer record
//! - [`VersionRelation`] - Protocol compatibility outcome
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod peer;
mod runtime;
mod version;

pub use error::TypesError;
pub use ids::AppInstanceId;
pub use peer::{HostInfo, PeerIdentity, Platform, SyncInfo};
pub use runtime::{ConnectState, SyncRuntimeInfo};
pub use version::VersionRelation;
