//! Mock transport for testing.
//!
//! Allows scripting probe, heartbeat and trust outcomes and capturing the
//! calls made for verification.

use super::{PeerEndpoint, PeerTransport, TransportError};
use async_trait::async_trait;
use clipsync_types::{AppInstanceId, HostInfo, SyncInfo, VersionRelation};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `probe_compatibility` with the candidate hosts.
    Probe {
        /// Hosts offered to the probe.
        hosts: Vec<HostInfo>,
    },
    /// `probe_single_host` against a host.
    ProbeHost {
        /// Probed host.
        host: String,
    },
    /// `heartbeat` against a host.
    Heartbeat {
        /// Target host.
        host: String,
    },
    /// `trust` with a token.
    Trust {
        /// Target host.
        host: String,
        /// Token offered.
        token: u32,
    },
    /// `show_token` against a host.
    ShowToken {
        /// Target host.
        host: String,
    },
    /// `notify_exit` against a host.
    NotifyExit {
        /// Target host.
        host: String,
    },
    /// `notify_remove` against a host.
    NotifyRemove {
        /// Target host.
        host: String,
    },
}

/// Mock transport for testing.
///
/// Unscripted heartbeats and trust calls fail as unreachable; unscripted
/// probes find nothing.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    probe_result: Option<(HostInfo, VersionRelation)>,
    host_relations: HashMap<String, VersionRelation>,
    heartbeats: VecDeque<Result<Option<VersionRelation>, TransportError>>,
    trusts: VecDeque<Result<bool, TransportError>>,
    show_token: Option<Result<bool, TransportError>>,
    fail_notify: Option<TransportError>,
    calls: Vec<TransportCall>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `probe_compatibility` find `host` with `relation`.
    pub fn set_probe_result(&self, host: HostInfo, relation: VersionRelation) {
        let mut inner = self.inner.lock().unwrap();
        inner.probe_result = Some((host, relation));
    }

    /// Make `probe_compatibility` find nothing.
    pub fn clear_probe_result(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.probe_result = None;
    }

    /// Make `probe_single_host` answer for `host`.
    pub fn set_host_relation(&self, host: &str, relation: VersionRelation) {
        let mut inner = self.inner.lock().unwrap();
        inner.host_relations.insert(host.to_string(), relation);
    }

    /// Queue the result of the next `heartbeat()` call.
    pub fn queue_heartbeat(&self, result: Result<Option<VersionRelation>, TransportError>) {
        let mut inner = self.inner.lock().unwrap();
        inner.heartbeats.push_back(result);
    }

    /// Queue the result of the next `trust()` call.
    pub fn queue_trust(&self, result: Result<bool, TransportError>) {
        let mut inner = self.inner.lock().unwrap();
        inner.trusts.push_back(result);
    }

    /// Set the result of every `show_token()` call.
    pub fn set_show_token(&self, result: Result<bool, TransportError>) {
        let mut inner = self.inner.lock().unwrap();
        inner.show_token = Some(result);
    }

    /// Make every notify call fail with `error`.
    pub fn fail_notifications(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_notify = Some(error);
    }

    /// Get all calls made so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        let inner = self.inner.lock().unwrap();
        inner.calls.clone()
    }

    /// Count calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Clear all scripted results and recorded calls.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
    }

    fn record(&self, call: TransportCall) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn probe_compatibility(
        &self,
        hosts: &[HostInfo],
        _target: &AppInstanceId,
        _port: u16,
    ) -> Option<(HostInfo, VersionRelation)> {
        self.record(TransportCall::Probe {
            hosts: hosts.to_vec(),
        });
        let inner = self.inner.lock().unwrap();
        inner.probe_result.clone()
    }

    async fn probe_single_host(&self, endpoint: &PeerEndpoint) -> Option<VersionRelation> {
        self.record(TransportCall::ProbeHost {
            host: endpoint.host.clone(),
        });
        let inner = self.inner.lock().unwrap();
        inner.host_relations.get(&endpoint.host).copied()
    }

    async fn heartbeat(
        &self,
        _local: &SyncInfo,
        endpoint: &PeerEndpoint,
    ) -> Result<Option<VersionRelation>, TransportError> {
        self.record(TransportCall::Heartbeat {
            host: endpoint.host.clone(),
        });
        let mut inner = self.inner.lock().unwrap();
        inner
            .heartbeats
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Unreachable(endpoint.host.clone())))
    }

    async fn trust(&self, endpoint: &PeerEndpoint, token: u32) -> Result<bool, TransportError> {
        self.record(TransportCall::Trust {
            host: endpoint.host.clone(),
            token,
        });
        let mut inner = self.inner.lock().unwrap();
        inner
            .trusts
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Unreachable(endpoint.host.clone())))
    }

    async fn show_token(&self, endpoint: &PeerEndpoint) -> Result<bool, TransportError> {
        self.record(TransportCall::ShowToken {
            host: endpoint.host.clone(),
        });
        let inner = self.inner.lock().unwrap();
        inner.show_token.clone().unwrap_or(Ok(true))
    }

    async fn notify_exit(&self, endpoint: &PeerEndpoint) -> Result<(), TransportError> {
        self.record(TransportCall::NotifyExit {
            host: endpoint.host.clone(),
        });
        let inner = self.inner.lock().unwrap();
        inner.fail_notify.clone().map_or(Ok(()), Err)
    }

    async fn notify_remove(&self, endpoint: &PeerEndpoint) -> Result<(), TransportError> {
        self.record(TransportCall::NotifyRemove {
            host: endpoint.host.clone(),
        });
        let inner = self.inner.lock().unwrap();
        inner.fail_notify.clone().map_or(Ok(()), Err)
    }
}
