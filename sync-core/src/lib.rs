//! # sync-core
//!
//! Pure logic for clipsync (no I/O, instant tests).
//!
//! This crate implements the decisions of the device synchronization engine
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`state`]: which resolution a connection state or record change calls for
//! - [`hosts`]: merging rediscovered addresses and choosing probe candidates
//! - [`backoff`]: the polling delay curve
//!
//! The actual I/O (probes, heartbeats, store writes) is performed by
//! `sync-engine`, which interprets the values produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod hosts;
pub mod state;

pub use backoff::{PollingBackoff, DEFAULT_POLL_INTERVAL};
pub use hosts::{is_declared_host, merge_host_lists, merge_sync_info, probe_candidates};
pub use state::{diff_transition, initial_transition, resolve_route, ResolveRoute, Transition};
