//! Events consumed by the connection resolver.
//!
//! Events are ephemeral: they exist only on the resolver's channel. Each
//! variant carries the snapshot of the peer it concerns and, where a caller
//! waits for completion, a [`Responder`].

use clipsync_types::{AppInstanceId, HostInfo, SyncRuntimeInfo, VersionRelation};
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Completion callback of an event.
///
/// Answers exactly once: either with the value passed to [`respond`], or
/// with `T::default()` if dropped unanswered (error, panic, closed channel).
///
/// [`respond`]: Responder::respond
pub struct Responder<T: Default> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T: Default> Responder<T> {
    /// A responder and the receiver its answer arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A responder nobody listens to.
    pub fn none() -> Self {
        Self { tx: None }
    }

    /// Deliver the answer.
    pub fn respond(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(value);
        }
    }
}

impl<T: Default> Drop for Responder<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(T::default());
        }
    }
}

impl<T: Default> fmt::Debug for Responder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("waiting", &self.tx.is_some())
            .finish()
    }
}

/// Events processed by the resolver.
#[derive(Debug)]
pub enum ResolveEvent {
    /// Probe declared hosts; answers with the version relation found.
    ResolveDisconnected {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// Receives the version relation of the reachable host, if any.
        responder: Responder<Option<VersionRelation>>,
    },
    /// Authenticate against the address in use.
    ResolveConnecting {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
    },
    /// Dispatch on the persisted state; answers with the resulting record.
    ResolveConnection {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// Receives the record after resolution.
        responder: Responder<Option<SyncRuntimeInfo>>,
    },
    /// Refresh discovery, then resolve regardless of state.
    ForceResolveConnection {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// Receives the record after resolution.
        responder: Responder<Option<SyncRuntimeInfo>>,
    },
    /// Pair with an unverified peer using a token.
    TrustByToken {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// Pairing token.
        token: u32,
        /// Receives whether trust was established.
        responder: Responder<bool>,
    },
    /// Ask an unverified peer to display its pairing token.
    ShowToken {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
    },
    /// Change whether we send to the peer.
    UpdateAllowSend {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// New value.
        allow_send: bool,
    },
    /// Change whether we accept from the peer.
    UpdateAllowReceive {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// New value.
        allow_receive: bool,
    },
    /// Change the peer's display name.
    UpdateNoteName {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// New note name.
        note_name: String,
    },
    /// Tell a connected peer we are exiting.
    NotifyExit {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
        /// Completes once the notice was attempted.
        responder: Responder<()>,
    },
    /// Persist the peer as disconnected on local shutdown.
    MarkExit {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
    },
    /// Forget the peer: key, record, and a best-effort notice.
    RemoveDevice {
        /// Peer snapshot.
        info: SyncRuntimeInfo,
    },
    /// Ask discovery to re-resolve the peer's addresses.
    RefreshSyncInfo {
        /// Peer to refresh.
        app_instance_id: AppInstanceId,
        /// Its declared hosts.
        host_info_list: Vec<HostInfo>,
    },
}

impl ResolveEvent {
    /// The peer this event concerns.
    pub fn app_instance_id(&self) -> &AppInstanceId {
        match self {
            Self::ResolveDisconnected { info, .. }
            | Self::ResolveConnecting { info }
            | Self::ResolveConnection { info, .. }
            | Self::ForceResolveConnection { info, .. }
            | Self::TrustByToken { info, .. }
            | Self::ShowToken { info }
            | Self::UpdateAllowSend { info, .. }
            | Self::UpdateAllowReceive { info, .. }
            | Self::UpdateNoteName { info, .. }
            | Self::NotifyExit { info, .. }
            | Self::MarkExit { info }
            | Self::RemoveDevice { info } => info.app_instance_id(),
            Self::RefreshSyncInfo {
                app_instance_id, ..
            } => app_instance_id,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResolveDisconnected { .. } => "ResolveDisconnected",
            Self::ResolveConnecting { .. } => "ResolveConnecting",
            Self::ResolveConnection { .. } => "ResolveConnection",
            Self::ForceResolveConnection { .. } => "ForceResolveConnection",
            Self::TrustByToken { .. } => "TrustByToken",
            Self::ShowToken { .. } => "ShowToken",
            Self::UpdateAllowSend { .. } => "UpdateAllowSend",
            Self::UpdateAllowReceive { .. } => "UpdateAllowReceive",
            Self::UpdateNoteName { .. } => "UpdateNoteName",
            Self::NotifyExit { .. } => "NotifyExit",
            Self::MarkExit { .. } => "MarkExit",
            Self::RemoveDevice { .. } => "RemoveDevice",
            Self::RefreshSyncInfo { .. } => "RefreshSyncInfo",
        }
    }
}

/// Sending half of the resolver's event channel.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<ResolveEvent>,
}

impl Emitter {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::UnboundedSender<ResolveEvent>) -> Self {
        Self { tx }
    }

    /// A new emitter and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResolveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `event`. Returns `false` if the resolver is gone; the event's
    /// responder then answers with its default.
    pub fn emit(&self, event: ResolveEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                tracing::debug!(
                    "Resolver closed, dropping {} for {}",
                    event.name(),
                    event.app_instance_id()
                );
                false
            }
        }
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
