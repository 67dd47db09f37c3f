//! Host list bookkeeping.
//!
//! Peers are multi-homed and rediscovered often. Discovery data is unioned
//! into the existing record rather than replacing it, and the compatibility
//! probe needs the declared hosts plus the last address that worked.

use clipsync_types::{HostInfo, SyncInfo, SyncRuntimeInfo};

/// Union `incoming` into `existing`, keyed by host address.
///
/// Entries already known keep their position; a re-announced address takes
/// the incoming prefix length. Returns `true` if `existing` changed.
pub fn merge_host_lists(existing: &mut Vec<HostInfo>, incoming: &[HostInfo]) -> bool {
    let mut changed = false;
    for host in incoming {
        match existing
            .iter_mut()
            .find(|known| known.host_address == host.host_address)
        {
            Some(known) => {
                if known.network_prefix_length != host.network_prefix_length {
                    known.network_prefix_length = host.network_prefix_length;
                    changed = true;
                }
            }
            None => {
                existing.push(host.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Fold a fresh announcement into a stored record.
///
/// Identity fields and port are replaced; hosts are merged. Connection and
/// preference fields are left alone. Returns `true` if the record changed.
pub fn merge_sync_info(record: &mut SyncRuntimeInfo, info: &SyncInfo) -> bool {
    let mut changed = false;
    if record.identity != info.identity {
        record.identity = info.identity.clone();
        changed = true;
    }
    if record.port != info.port {
        record.port = info.port;
        changed = true;
    }
    merge_host_lists(&mut record.host_info_list, &info.host_info_list) || changed
}

/// Hosts worth probing for `record`: every declared host, then the address
/// in use if it is not among them.
pub fn probe_candidates(record: &SyncRuntimeInfo) -> Vec<HostInfo> {
    let mut candidates = record.host_info_list.clone();
    if let Some(current) = record.connect_host_info() {
        if !candidates
            .iter()
            .any(|host| host.host_address == current.host_address)
        {
            candidates.push(current);
        }
    }
    candidates
}

/// Whether `address` is one of the declared hosts of `record`.
pub fn is_declared_host(record: &SyncRuntimeInfo, address: &str) -> bool {
    record
        .host_info_list
        .iter()
        .any(|host| host.host_address == address)
}
