//! Connection state dispatch for clipsync peers.
//!
//! This module holds the two decisions the engine makes purely from
//! persisted records, with no I/O:
//!
//! - which resolution routine handles a peer in a given [`ConnectState`]
//!   ([`resolve_route`]);
//! - which resolution a per-peer handler should request when its record
//!   changes ([`initial_transition`] and [`diff_transition`]).
//!
//! The actual probing, heartbeats and store writes are performed by
//! sync-engine, which interprets the returned values.

use clipsync_types::{ConnectState, SyncRuntimeInfo};

/// Resolution routine responsible for a connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveRoute {
    /// Probe declared hosts for a reachable, compatible address.
    Disconnected,
    /// Authenticate against the address in use.
    Connecting,
}

/// Resolve request a per-peer handler emits after observing its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run the disconnected routine.
    ResolveDisconnected,
    /// Run the connecting routine.
    ResolveConnecting,
    /// Dispatch on the persisted state.
    ResolveConnection,
    /// Ask discovery to refresh the peer's addresses.
    RefreshSyncInfo,
}

/// Pick the resolution routine for `state`.
///
/// A connected peer is re-validated through the connecting routine.
pub fn resolve_route(state: ConnectState) -> ResolveRoute {
    match state {
        ConnectState::Disconnected
        | ConnectState::Incompatible
        | ConnectState::Unmatched
        | ConnectState::Unverified => ResolveRoute::Disconnected,
        ConnectState::Connecting | ConnectState::Connected => ResolveRoute::Connecting,
    }
}

/// Event a freshly created handler emits for its first observed record.
pub fn initial_transition(state: ConnectState) -> Transition {
    match state {
        ConnectState::Disconnected
        | ConnectState::Incompatible
        | ConnectState::Unmatched
        | ConnectState::Unverified => Transition::ResolveDisconnected,
        ConnectState::Connecting => Transition::ResolveConnecting,
        ConnectState::Connected => Transition::ResolveConnection,
    }
}

/// Decide what to do when a handler's record changes from `old` to `new`.
///
/// Returns `None` for changes that do not affect connectivity, such as the
/// note name or send/receive preferences.
pub fn diff_transition(old: &SyncRuntimeInfo, new: &SyncRuntimeInfo) -> Option<Transition> {
    let endpoint_moved =
        old.port != new.port || old.connect_host_address != new.connect_host_address;

    if endpoint_moved && !new.connect_state.is_disconnected() {
        return Some(Transition::ResolveConnection);
    }

    if old.connect_state != new.connect_state {
        return match new.connect_state {
            ConnectState::Disconnected => Some(Transition::RefreshSyncInfo),
            ConnectState::Connecting => Some(Transition::ResolveConnecting),
            ConnectState::Connected => Some(Transition::ResolveConnection),
            ConnectState::Incompatible | ConnectState::Unverified | ConnectState::Unmatched => {
                None
            }
        };
    }

    if old.host_info_list != new.host_info_list && new.connect_state == ConnectState::Connected {
        return Some(Transition::ResolveConnection);
    }

    None
}
