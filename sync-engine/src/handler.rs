//! PeerSyncHandler - live view of one peer.
//!
//! A handler holds the latest snapshot of its peer's record and turns record
//! changes into resolver events. It never writes the record itself; every
//! public method is a thin emit to the resolver with the snapshot attached.

use crate::event::{Emitter, ResolveEvent, Responder};
use clipsync_core::{diff_transition, initial_transition, Transition};
use clipsync_types::{AppInstanceId, SyncRuntimeInfo};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Per-peer handler.
#[derive(Debug)]
pub struct PeerSyncHandler {
    app_instance_id: AppInstanceId,
    snapshot: watch::Sender<SyncRuntimeInfo>,
    emitter: Emitter,
    cancel: CancellationToken,
    connect_address_timeout: Duration,
}

impl PeerSyncHandler {
    /// Create a handler for `record`.
    ///
    /// Emits the event matching the record's current state before returning,
    /// then follows snapshot updates on a background task. Must be called
    /// from within a Tokio runtime.
    pub fn new(record: SyncRuntimeInfo, emitter: Emitter, connect_address_timeout: Duration) -> Self {
        Self::with_cancel(
            record,
            emitter,
            connect_address_timeout,
            CancellationToken::new(),
        )
    }

    /// Like [`new`](Self::new), stopping when `cancel` fires.
    pub fn with_cancel(
        record: SyncRuntimeInfo,
        emitter: Emitter,
        connect_address_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let app_instance_id = record.app_instance_id().clone();
        let (snapshot, rx) = watch::channel(record.clone());

        emitter.emit(transition_event(
            initial_transition(record.connect_state),
            record,
        ));
        tokio::spawn(follow_changes(rx, emitter.clone(), cancel.clone()));

        Self {
            app_instance_id,
            snapshot,
            emitter,
            cancel,
            connect_address_timeout,
        }
    }

    /// The peer this handler follows.
    pub fn app_instance_id(&self) -> &AppInstanceId {
        &self.app_instance_id
    }

    /// Latest snapshot of the peer's record.
    pub fn current(&self) -> SyncRuntimeInfo {
        self.snapshot.borrow().clone()
    }

    /// Replace the snapshot. Identical snapshots are ignored.
    pub fn update_sync_runtime_info(&self, record: SyncRuntimeInfo) {
        self.snapshot.send_if_modified(|current| {
            if *current == record {
                return false;
            }
            *current = record;
            true
        });
    }

    /// Re-resolve from the persisted state.
    pub fn resolve(&self) {
        self.emit(ResolveEvent::ResolveConnection {
            info: self.current(),
            responder: Responder::none(),
        });
    }

    /// Refresh discovery and re-resolve. Returns the record afterwards.
    pub async fn force_resolve(&self) -> Option<SyncRuntimeInfo> {
        let (responder, rx) = Responder::channel();
        self.emit(ResolveEvent::ForceResolveConnection {
            info: self.current(),
            responder,
        });
        rx.await.ok().flatten()
    }

    /// Change whether we send to this peer.
    pub fn update_allow_send(&self, allow_send: bool) {
        self.emit(ResolveEvent::UpdateAllowSend {
            info: self.current(),
            allow_send,
        });
    }

    /// Change whether we accept from this peer.
    pub fn update_allow_receive(&self, allow_receive: bool) {
        self.emit(ResolveEvent::UpdateAllowReceive {
            info: self.current(),
            allow_receive,
        });
    }

    /// Change the display name of this peer.
    pub fn update_note_name(&self, note_name: impl Into<String>) {
        self.emit(ResolveEvent::UpdateNoteName {
            info: self.current(),
            note_name: note_name.into(),
        });
    }

    /// Pair using `token`. Returns whether trust was established.
    pub async fn trust_by_token(&self, token: u32) -> bool {
        let (responder, rx) = Responder::channel();
        self.emit(ResolveEvent::TrustByToken {
            info: self.current(),
            token,
            responder,
        });
        rx.await.unwrap_or(false)
    }

    /// Ask the peer to display its pairing token.
    pub fn show_token(&self) {
        self.emit(ResolveEvent::ShowToken {
            info: self.current(),
        });
    }

    /// Send an exit notice if connected, and wait for the attempt.
    pub async fn notify_exit(&self) {
        let (responder, rx) = Responder::channel();
        self.emit(ResolveEvent::NotifyExit {
            info: self.current(),
            responder,
        });
        let _ = rx.await;
    }

    /// Persist the peer as disconnected.
    pub fn mark_exit(&self) {
        self.emit(ResolveEvent::MarkExit {
            info: self.current(),
        });
    }

    /// Forget the peer.
    pub fn remove_device(&self) {
        self.emit(ResolveEvent::RemoveDevice {
            info: self.current(),
        });
    }

    /// The address in use.
    ///
    /// Answers immediately when known; otherwise triggers a resolution and
    /// waits for it, returning `None` once the configured timeout expires.
    pub async fn get_connect_host_address(&self) -> Option<String> {
        let current = self.current();
        if let Some(address) = current.connect_host_address {
            return Some(address);
        }

        let (responder, rx) = Responder::channel();
        self.emit(ResolveEvent::ResolveConnection {
            info: current,
            responder,
        });
        match tokio::time::timeout(self.connect_address_timeout, rx).await {
            Ok(Ok(record)) => record.and_then(|record| record.connect_host_address),
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::debug!(
                    "Timed out waiting for an address for {}",
                    self.app_instance_id
                );
                None
            }
        }
    }

    /// Stop following record changes. Events already emitted still complete.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn emit(&self, event: ResolveEvent) {
        self.emitter.emit(event);
    }
}

impl Drop for PeerSyncHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn follow_changes(
    mut rx: watch::Receiver<SyncRuntimeInfo>,
    emitter: Emitter,
    cancel: CancellationToken,
) {
    let mut previous = rx.borrow_and_update().clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let current = rx.borrow_and_update().clone();
        if let Some(transition) = diff_transition(&previous, &current) {
            // No new work once stopped.
            if cancel.is_cancelled() {
                break;
            }
            emitter.emit(transition_event(transition, current.clone()));
        }
        previous = current;
    }
    tracing::debug!("Stopped following {}", previous.app_instance_id());
}

fn transition_event(transition: Transition, info: SyncRuntimeInfo) -> ResolveEvent {
    match transition {
        Transition::ResolveDisconnected => ResolveEvent::ResolveDisconnected {
            info,
            responder: Responder::none(),
        },
        Transition::ResolveConnecting => ResolveEvent::ResolveConnecting { info },
        Transition::ResolveConnection => ResolveEvent::ResolveConnection {
            info,
            responder: Responder::none(),
        },
        Transition::RefreshSyncInfo => ResolveEvent::RefreshSyncInfo {
            app_instance_id: info.app_instance_id().clone(),
            host_info_list: info.host_info_list,
        },
    }
}
