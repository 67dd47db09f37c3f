//! SyncResolver - the connection state machine.
//!
//! The resolver consumes [`ResolveEvent`]s, reads the authoritative peer
//! record, talks to the transport, discovery and secure store, and writes the
//! resulting connection state back to the [`PeerStore`]. It holds no peer
//! state of its own.
//!
//! # Architecture
//!
//! ```text
//! Emitter → router task → per-peer lane (FIFO) → SyncResolver::process
//!                                                    ↓
//!                          PeerStore / PeerTransport / Discovery / SecureStore
//! ```
//!
//! Events for one peer are processed in emission order; lanes of different
//! peers run concurrently. Every error and panic is contained at the
//! per-event boundary, and the event's responder always answers.
//!
//! # State dispatch
//!
//! | Persisted state | Routine |
//! |---|---|
//! | DISCONNECTED / INCOMPATIBLE / UNMATCHED / UNVERIFIED | `resolve_disconnected` |
//! | CONNECTING / CONNECTED | `resolve_connecting` |

use crate::discovery::Discovery;
use crate::error::Result;
use crate::event::{Emitter, ResolveEvent};
use crate::identity::SyncInfoFactory;
use crate::secure::SecureStore;
use crate::store::PeerStore;
use crate::token::TokenCache;
use crate::transport::{PeerEndpoint, PeerTransport, TransportError};
use clipsync_core::{probe_candidates, resolve_route, ResolveRoute};
use clipsync_types::{AppInstanceId, ConnectState, HostInfo, SyncRuntimeInfo, VersionRelation};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The connection resolver.
pub struct SyncResolver {
    store: Arc<dyn PeerStore>,
    transport: Arc<dyn PeerTransport>,
    discovery: Arc<dyn Discovery>,
    secure_store: Arc<dyn SecureStore>,
    token_cache: Arc<TokenCache>,
    sync_info_factory: Arc<dyn SyncInfoFactory>,
}

/// Running resolver event loop.
#[derive(Debug)]
pub struct ResolverHandle {
    emitter: Emitter,
    cancel: CancellationToken,
    lanes: watch::Receiver<usize>,
    join: JoinHandle<()>,
}

impl ResolverHandle {
    /// Emitter feeding this resolver.
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Number of peers with queued or in-flight events.
    pub fn active_lanes(&self) -> usize {
        *self.lanes.borrow()
    }

    /// Stop routing new events. Events already in a lane still complete.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the router task to finish.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!("Resolver router task failed: {}", e);
        }
    }
}

/// A peer's FIFO lane and the number of its events not yet finished.
struct Lane {
    tx: mpsc::UnboundedSender<ResolveEvent>,
    in_flight: usize,
}

impl SyncResolver {
    /// Create a resolver over its collaborators.
    pub fn new(
        store: Arc<dyn PeerStore>,
        transport: Arc<dyn PeerTransport>,
        discovery: Arc<dyn Discovery>,
        secure_store: Arc<dyn SecureStore>,
        token_cache: Arc<TokenCache>,
        sync_info_factory: Arc<dyn SyncInfoFactory>,
    ) -> Self {
        Self {
            store,
            transport,
            discovery,
            secure_store,
            token_cache,
            sync_info_factory,
        }
    }

    /// Start the event loop and return its handle.
    ///
    /// A peer keeps one lane while it has queued or in-flight events, so its
    /// events never overlap. Idle lanes are closed.
    pub fn spawn(self: Arc<Self>) -> ResolverHandle {
        let (emitter, mut rx) = Emitter::channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<AppInstanceId>();
        let (lane_count, lanes_rx) = watch::channel(0usize);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let mut lanes: HashMap<AppInstanceId, Lane> = HashMap::new();

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    Some(id) = done_rx.recv() => {
                        if let Some(lane) = lanes.get_mut(&id) {
                            lane.in_flight = lane.in_flight.saturating_sub(1);
                            if lane.in_flight == 0 {
                                lanes.remove(&id);
                            }
                        }
                    }
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let id = event.app_instance_id().clone();
                        let lane = lanes.entry(id.clone()).or_insert_with(|| Lane {
                            tx: spawn_lane(Arc::clone(&self), id.clone(), done_tx.clone()),
                            in_flight: 0,
                        });
                        if let Err(mpsc::error::SendError(event)) = lane.tx.send(event) {
                            tracing::warn!("Resolver lane for {} was gone, restarting", id);
                            lane.tx = spawn_lane(Arc::clone(&self), id.clone(), done_tx.clone());
                            lane.in_flight = 0;
                            let _ = lane.tx.send(event);
                        }
                        lane.in_flight += 1;
                    }
                }
                lane_count.send_replace(lanes.len());
            }

            tracing::debug!("Resolver event loop stopped");
        });

        ResolverHandle {
            emitter,
            cancel,
            lanes: lanes_rx,
            join,
        }
    }

    /// Process one event to completion.
    ///
    /// Never fails and never panics: errors are logged and the event's
    /// responder answers with its default.
    pub async fn process(&self, event: ResolveEvent) {
        let name = event.name();
        let id = event.app_instance_id().clone();
        if AssertUnwindSafe(self.handle(event))
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::error!("Resolver panicked handling {} for {}", name, id);
        }
    }

    async fn handle(&self, event: ResolveEvent) {
        let name = event.name();
        match event {
            ResolveEvent::ResolveDisconnected { info, responder } => {
                let result = self.resolve_disconnected(&info).await;
                responder.respond(settle(name, &info, result));
            }
            ResolveEvent::ResolveConnecting { info } => {
                let result = self.resolve_connecting(&info).await;
                settle(name, &info, result);
            }
            ResolveEvent::ResolveConnection { info, responder } => {
                let result = self.resolve_connection(&info).await;
                responder.respond(settle(name, &info, result));
            }
            ResolveEvent::ForceResolveConnection { info, responder } => {
                let result = self.force_resolve_connection(&info).await;
                responder.respond(settle(name, &info, result));
            }
            ResolveEvent::TrustByToken {
                info,
                token,
                responder,
            } => {
                let result = self.trust_by_token(&info, token).await;
                responder.respond(settle(name, &info, result));
            }
            ResolveEvent::ShowToken { info } => {
                let result = self.show_token(&info).await;
                settle(name, &info, result);
            }
            ResolveEvent::UpdateAllowSend { info, allow_send } => {
                let result = self
                    .update_preferences(&info, |record| record.allow_send = allow_send)
                    .await;
                settle(name, &info, result);
            }
            ResolveEvent::UpdateAllowReceive {
                info,
                allow_receive,
            } => {
                let result = self
                    .update_preferences(&info, |record| record.allow_receive = allow_receive)
                    .await;
                settle(name, &info, result);
            }
            ResolveEvent::UpdateNoteName { info, note_name } => {
                let result = self
                    .update_preferences(&info, |record| record.note_name = Some(note_name))
                    .await;
                settle(name, &info, result);
            }
            ResolveEvent::NotifyExit { info, responder } => {
                let result = self.notify_exit(&info).await;
                responder.respond(settle(name, &info, result));
            }
            ResolveEvent::MarkExit { info } => {
                let result = self.mark_exit(&info).await;
                settle(name, &info, result);
            }
            ResolveEvent::RemoveDevice { info } => {
                let result = self.remove_device(&info).await;
                settle(name, &info, result);
            }
            ResolveEvent::RefreshSyncInfo {
                app_instance_id,
                host_info_list,
            } => {
                self.discovery
                    .refresh_target(&app_instance_id, &host_info_list)
                    .await;
            }
        }
    }

    /// Probe every declared host plus the last address in use.
    ///
    /// Persists CONNECTING on an equal version, INCOMPATIBLE otherwise, and
    /// DISCONNECTED (address untouched) when nothing answers.
    pub async fn resolve_disconnected(
        &self,
        info: &SyncRuntimeInfo,
    ) -> Result<Option<VersionRelation>> {
        let Some(current) = self.current(info).await? else {
            return Ok(None);
        };

        let candidates = probe_candidates(&current);
        let found = self
            .transport
            .probe_compatibility(&candidates, current.app_instance_id(), current.port)
            .await;

        match found {
            Some((host, relation)) => {
                let state = if relation.is_compatible() {
                    ConnectState::Connecting
                } else {
                    ConnectState::Incompatible
                };
                self.persist(current, state, Some(&host)).await?;
                Ok(Some(relation))
            }
            None => {
                self.persist(current, ConnectState::Disconnected, None)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Authenticate against the address in use.
    ///
    /// With a stored key this is a heartbeat; a key the peer can no longer
    /// decrypt with is deleted and the peer falls back to token or probe.
    pub async fn resolve_connecting(&self, info: &SyncRuntimeInfo) -> Result<()> {
        let Some(current) = self.current(info).await? else {
            return Ok(());
        };
        let Some(endpoint) = PeerEndpoint::of(&current) else {
            self.persist(current, ConnectState::Disconnected, None)
                .await?;
            return Ok(());
        };

        let current = if self
            .secure_store
            .has_public_key(&endpoint.app_instance_id)
            .await?
        {
            let local = self.sync_info_factory.create_sync_info();
            match self.transport.heartbeat(&local, &endpoint).await {
                Ok(relation) => {
                    self.apply_heartbeat(current, relation).await?;
                    return Ok(());
                }
                Err(err) if err.is_trust_failure() => {
                    tracing::warn!(
                        "Heartbeat to {} failed ({}), stored key is unmatched",
                        endpoint.app_instance_id,
                        err
                    );
                    let current = self
                        .persist(current, ConnectState::Unmatched, None)
                        .await?;
                    self.secure_store
                        .delete_public_key(&endpoint.app_instance_id)
                        .await?;
                    current
                }
                Err(TransportError::AppInstanceMismatch) => {
                    tracing::info!(
                        "{} at {} is now a different instance",
                        endpoint.app_instance_id,
                        endpoint.host
                    );
                    self.persist(current, ConnectState::Disconnected, None)
                        .await?;
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(
                        "Heartbeat to {} at {} failed: {}",
                        endpoint.app_instance_id,
                        endpoint.host,
                        err
                    );
                    self.persist(current, ConnectState::Disconnected, None)
                        .await?;
                    return Ok(());
                }
            }
        } else {
            current
        };

        self.try_use_token_cache(current, &endpoint).await
    }

    /// Dispatch on the persisted state and return the resulting record.
    pub async fn resolve_connection(
        &self,
        info: &SyncRuntimeInfo,
    ) -> Result<Option<SyncRuntimeInfo>> {
        let Some(current) = self.current(info).await? else {
            return Ok(None);
        };

        match resolve_route(current.connect_state) {
            ResolveRoute::Disconnected => {
                self.resolve_disconnected(&current).await?;
            }
            ResolveRoute::Connecting => {
                self.resolve_connecting(&current).await?;
            }
        }

        Ok(self.store.get_peer(current.app_instance_id()).await?)
    }

    /// Refresh discovery for the peer, then resolve regardless of state.
    pub async fn force_resolve_connection(
        &self,
        info: &SyncRuntimeInfo,
    ) -> Result<Option<SyncRuntimeInfo>> {
        let Some(current) = self.current(info).await? else {
            return Ok(None);
        };
        self.discovery
            .refresh_target(current.app_instance_id(), &current.host_info_list)
            .await;
        self.resolve_connection(&current).await
    }

    /// Pair with an unverified peer using `token`.
    ///
    /// Returns `false` without touching the store unless the peer is
    /// UNVERIFIED with an address in use.
    pub async fn trust_by_token(&self, info: &SyncRuntimeInfo, token: u32) -> Result<bool> {
        let Some(current) = self.current(info).await? else {
            return Ok(false);
        };
        if current.connect_state != ConnectState::Unverified {
            tracing::debug!(
                "Ignoring token for {} in state {}",
                current.app_instance_id(),
                current.connect_state
            );
            return Ok(false);
        }
        let Some(endpoint) = PeerEndpoint::of(&current) else {
            return Ok(false);
        };

        match self.transport.trust(&endpoint, token).await {
            Ok(true) => {
                self.heartbeat_after_trust(current, &endpoint).await?;
                Ok(true)
            }
            Ok(false) | Err(TransportError::TokenRejected) => {
                tracing::info!("Token rejected by {}", endpoint.app_instance_id);
                Ok(false)
            }
            Err(err) => {
                tracing::debug!("Trust call to {} failed: {}", endpoint.app_instance_id, err);
                Ok(false)
            }
        }
    }

    /// Ask an unverified peer to display its pairing token.
    pub async fn show_token(&self, info: &SyncRuntimeInfo) -> Result<()> {
        let Some(current) = self.current(info).await? else {
            return Ok(());
        };
        if current.connect_state != ConnectState::Unverified {
            return Ok(());
        }
        let Some(endpoint) = PeerEndpoint::of(&current) else {
            return Ok(());
        };

        match self.transport.show_token(&endpoint).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("{} declined to show a token", endpoint.app_instance_id),
            Err(err) => {
                tracing::debug!("Show token on {} failed: {}", endpoint.app_instance_id, err);
                self.persist(current, ConnectState::Disconnected, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Tell a connected peer we are exiting. No state change.
    pub async fn notify_exit(&self, info: &SyncRuntimeInfo) -> Result<()> {
        let Some(current) = self.current(info).await? else {
            return Ok(());
        };
        if current.connect_state != ConnectState::Connected {
            return Ok(());
        }
        if let Some(endpoint) = PeerEndpoint::of(&current) {
            if let Err(err) = self.transport.notify_exit(&endpoint).await {
                tracing::warn!("Exit notice to {} failed: {}", endpoint.app_instance_id, err);
            }
        }
        Ok(())
    }

    /// Persist DISCONNECTED without contacting the peer.
    pub async fn mark_exit(&self, info: &SyncRuntimeInfo) -> Result<()> {
        let Some(current) = self.current(info).await? else {
            return Ok(());
        };
        self.persist(current, ConnectState::Disconnected, None)
            .await?;
        Ok(())
    }

    /// Delete the peer's key and record, then notify it if an address is known.
    ///
    /// Local deletion happens even when the notice fails.
    pub async fn remove_device(&self, info: &SyncRuntimeInfo) -> Result<()> {
        let id = info.app_instance_id();
        let current = match self.store.get_peer(id).await {
            Ok(Some(current)) => current,
            Ok(None) => info.clone(),
            Err(err) => {
                tracing::warn!("Reading {} before removal failed: {}", id, err);
                info.clone()
            }
        };

        let key_deleted = self.secure_store.delete_public_key(id).await;
        let record_deleted = self.store.delete_peer(id).await;

        if let Some(endpoint) = PeerEndpoint::of(&current) {
            if let Err(err) = self.transport.notify_remove(&endpoint).await {
                tracing::warn!("Remove notice to {} failed: {}", id, err);
            }
        }

        key_deleted?;
        record_deleted?;
        tracing::info!("Removed device {}", id);
        Ok(())
    }

    async fn try_use_token_cache(
        &self,
        current: SyncRuntimeInfo,
        endpoint: &PeerEndpoint,
    ) -> Result<()> {
        if let Some(token) = self.token_cache.take_token(&endpoint.app_instance_id) {
            match self.transport.trust(endpoint, token).await {
                Ok(true) => {
                    self.heartbeat_after_trust(current, endpoint).await?;
                    return Ok(());
                }
                Ok(false) => {
                    tracing::debug!("Cached token rejected by {}", endpoint.app_instance_id)
                }
                Err(err) => tracing::debug!(
                    "Trust with cached token failed for {}: {}",
                    endpoint.app_instance_id,
                    err
                ),
            }
        }

        let state = match self.transport.probe_single_host(endpoint).await {
            None => ConnectState::Disconnected,
            Some(VersionRelation::EqualTo) => ConnectState::Unverified,
            Some(_) => ConnectState::Incompatible,
        };
        self.persist(current, state, None).await?;
        Ok(())
    }

    async fn heartbeat_after_trust(
        &self,
        current: SyncRuntimeInfo,
        endpoint: &PeerEndpoint,
    ) -> Result<SyncRuntimeInfo> {
        let local = self.sync_info_factory.create_sync_info();
        match self.transport.heartbeat(&local, endpoint).await {
            Ok(relation) => self.apply_heartbeat(current, relation).await,
            Err(err) => {
                tracing::debug!(
                    "Heartbeat after trust to {} failed: {}",
                    endpoint.app_instance_id,
                    err
                );
                self.persist(current, ConnectState::Disconnected, None)
                    .await
            }
        }
    }

    async fn apply_heartbeat(
        &self,
        current: SyncRuntimeInfo,
        relation: Option<VersionRelation>,
    ) -> Result<SyncRuntimeInfo> {
        let state = match relation {
            Some(VersionRelation::EqualTo) => ConnectState::Connected,
            Some(_) => ConnectState::Incompatible,
            None => ConnectState::Disconnected,
        };
        let record = self.persist(current, state, None).await?;
        if state == ConnectState::Connected {
            tracing::info!(
                target: "clipsync::significant_action",
                "Connected to {}",
                record.app_instance_id()
            );
        }
        Ok(record)
    }

    async fn update_preferences(
        &self,
        info: &SyncRuntimeInfo,
        apply: impl FnOnce(&mut SyncRuntimeInfo) + Send,
    ) -> Result<()> {
        let Some(mut current) = self.current(info).await? else {
            return Ok(());
        };
        apply(&mut current);
        self.store.update_preference_fields(&current).await?;
        Ok(())
    }

    async fn current(&self, info: &SyncRuntimeInfo) -> Result<Option<SyncRuntimeInfo>> {
        let current = self.store.get_peer(info.app_instance_id()).await?;
        if current.is_none() {
            tracing::debug!("{} is no longer stored, skipping", info.app_instance_id());
        }
        Ok(current)
    }

    async fn persist(
        &self,
        mut record: SyncRuntimeInfo,
        state: ConnectState,
        host: Option<&HostInfo>,
    ) -> Result<SyncRuntimeInfo> {
        let previous = record.connect_state;
        record.set_connection(state, host);
        if self.store.update_connection_fields(&record).await?.is_none() {
            tracing::debug!("{} vanished before its state was written", record.app_instance_id());
        } else if previous != state {
            tracing::info!(
                "Peer {} {} -> {}",
                record.app_instance_id(),
                previous,
                state
            );
        }
        Ok(record)
    }
}

fn spawn_lane(
    resolver: Arc<SyncResolver>,
    id: AppInstanceId,
    done: mpsc::UnboundedSender<AppInstanceId>,
) -> mpsc::UnboundedSender<ResolveEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ResolveEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            resolver.process(event).await;
            // Router may be gone after stop.
            let _ = done.send(id.clone());
        }
        tracing::debug!("Resolver lane for {} closed", id);
    });
    tx
}

fn settle<T: Default>(name: &str, info: &SyncRuntimeInfo, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("{} failed for {}: {}", name, info.app_instance_id(), err);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MockDiscovery;
    use crate::error::StoreError;
    use crate::event::Responder;
    use crate::identity::StaticSyncInfoFactory;
    use crate::secure::MemorySecureStore;
    use crate::store::MemoryPeerStore;
    use crate::transport::{MockTransport, TransportCall};
    use async_trait::async_trait;
    use clipsync_types::{PeerIdentity, Platform, SyncInfo};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;

    const PEER: &str = "peer-a";

    fn sync_info(id: &str, hosts: Vec<HostInfo>) -> SyncInfo {
        SyncInfo {
            identity: PeerIdentity {
                app_instance_id: AppInstanceId::new(id),
                device_id: format!("device-{}", id),
                device_name: "Desktop".into(),
                platform: Platform::current(),
                app_version: "1.0.0".into(),
            },
            host_info_list: hosts,
            port: 13129,
        }
    }

    fn peer(state: ConnectState, connect: Option<&str>) -> SyncRuntimeInfo {
        let mut record =
            SyncRuntimeInfo::from_sync_info(&sync_info(PEER, vec![HostInfo::new("192.168.1.100", 24)]));
        record.connect_state = state;
        record.connect_host_address = connect.map(str::to_string);
        record.connect_network_prefix_length = connect.map(|_| 24);
        record
    }

    struct Harness {
        store: Arc<MemoryPeerStore>,
        transport: MockTransport,
        discovery: MockDiscovery,
        secure: Arc<MemorySecureStore>,
        tokens: Arc<TokenCache>,
        resolver: Arc<SyncResolver>,
    }

    impl Harness {
        fn new(records: Vec<SyncRuntimeInfo>) -> Self {
            let transport = MockTransport::new();
            Self::wired(records, transport.clone(), Arc::new(transport))
        }

        /// `transport` scripts results; `wire` is what the resolver calls.
        fn wired(
            records: Vec<SyncRuntimeInfo>,
            transport: MockTransport,
            wire: Arc<dyn PeerTransport>,
        ) -> Self {
            let store = Arc::new(MemoryPeerStore::with_records(records));
            let discovery = MockDiscovery::new();
            let secure = Arc::new(MemorySecureStore::new());
            let tokens = Arc::new(TokenCache::default());
            let resolver = Arc::new(SyncResolver::new(
                store.clone(),
                wire,
                Arc::new(discovery.clone()),
                secure.clone(),
                tokens.clone(),
                Arc::new(StaticSyncInfoFactory::new(sync_info("local", vec![]))),
            ));
            Self {
                store,
                transport,
                discovery,
                secure,
                tokens,
                resolver,
            }
        }

        fn with_key(self) -> Self {
            self.secure.save_public_key(AppInstanceId::new(PEER), vec![7; 32]);
            self
        }

        async fn stored(&self) -> SyncRuntimeInfo {
            self.store
                .get_peer(&AppInstanceId::new(PEER))
                .await
                .unwrap()
                .expect("peer should be stored")
        }
    }

    // ===========================================
    // resolve_disconnected
    // ===========================================

    #[tokio::test]
    async fn disconnected_peer_with_equal_probe_becomes_connecting() {
        let h = Harness::new(vec![peer(ConnectState::Disconnected, None)]);
        h.transport
            .set_probe_result(HostInfo::new("192.168.1.100", 24), VersionRelation::EqualTo);

        let relation = h
            .resolver
            .resolve_disconnected(&peer(ConnectState::Disconnected, None))
            .await
            .unwrap();

        assert_eq!(relation, Some(VersionRelation::EqualTo));
        let stored = h.stored().await;
        assert_eq!(stored.connect_state, ConnectState::Connecting);
        assert_eq!(stored.connect_host_address.as_deref(), Some("192.168.1.100"));
        assert_eq!(stored.connect_network_prefix_length, Some(24));
    }

    #[tokio::test]
    async fn version_mismatch_becomes_incompatible_with_host() {
        for relation in [VersionRelation::LowerThan, VersionRelation::HigherThan] {
            let h = Harness::new(vec![peer(ConnectState::Disconnected, None)]);
            h.transport
                .set_probe_result(HostInfo::new("192.168.1.100", 24), relation);

            let found = h
                .resolver
                .resolve_disconnected(&peer(ConnectState::Disconnected, None))
                .await
                .unwrap();

            assert_eq!(found, Some(relation));
            let stored = h.stored().await;
            assert_eq!(stored.connect_state, ConnectState::Incompatible);
            assert_eq!(stored.connect_host_address.as_deref(), Some("192.168.1.100"));
        }
    }

    #[tokio::test]
    async fn unreachable_probe_stays_disconnected_and_keeps_address() {
        let h = Harness::new(vec![peer(ConnectState::Incompatible, Some("10.0.0.9"))]);

        let found = h
            .resolver
            .resolve_disconnected(&peer(ConnectState::Incompatible, None))
            .await
            .unwrap();

        assert_eq!(found, None);
        let stored = h.stored().await;
        assert_eq!(stored.connect_state, ConnectState::Disconnected);
        assert_eq!(stored.connect_host_address.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn probe_includes_last_connect_address() {
        let h = Harness::new(vec![peer(ConnectState::Disconnected, Some("10.0.0.9"))]);

        h.resolver
            .resolve_disconnected(&peer(ConnectState::Disconnected, None))
            .await
            .unwrap();

        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::Probe {
                hosts: vec![HostInfo::new("192.168.1.100", 24), HostInfo::new("10.0.0.9", 24)]
            }]
        );
    }

    #[tokio::test]
    async fn stale_snapshot_is_resolved_against_stored_record() {
        let h = Harness::new(vec![peer(ConnectState::Disconnected, Some("10.0.0.9"))]);
        let stale = SyncRuntimeInfo {
            host_info_list: vec![],
            ..peer(ConnectState::Connected, None)
        };

        h.resolver.resolve_disconnected(&stale).await.unwrap();

        let probed = h.transport.calls();
        assert!(matches!(&probed[0], TransportCall::Probe { hosts } if hosts.len() == 2));
    }

    // ===========================================
    // resolve_connecting
    // ===========================================

    #[tokio::test]
    async fn connecting_without_address_becomes_disconnected() {
        let h = Harness::new(vec![peer(ConnectState::Connecting, None)]).with_key();

        h.resolver
            .resolve_connecting(&peer(ConnectState::Connecting, None))
            .await
            .unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Disconnected);
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_results_map_to_states() {
        let cases = [
            (Some(VersionRelation::EqualTo), ConnectState::Connected),
            (Some(VersionRelation::LowerThan), ConnectState::Incompatible),
            (Some(VersionRelation::HigherThan), ConnectState::Incompatible),
            (None, ConnectState::Disconnected),
        ];
        for (relation, expected) in cases {
            let record = peer(ConnectState::Connecting, Some("192.168.1.100"));
            let h = Harness::new(vec![record.clone()]).with_key();
            h.transport.queue_heartbeat(Ok(relation));

            h.resolver.resolve_connecting(&record).await.unwrap();

            assert_eq!(h.stored().await.connect_state, expected, "{:?}", relation);
        }
    }

    #[tokio::test]
    async fn instance_mismatch_disconnects_and_keeps_key() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]).with_key();
        h.transport
            .queue_heartbeat(Err(TransportError::AppInstanceMismatch));

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Disconnected);
        assert!(h.secure.contains(&AppInstanceId::new(PEER)));
    }

    #[tokio::test]
    async fn other_heartbeat_failures_disconnect() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]).with_key();
        h.transport.queue_heartbeat(Err(TransportError::Timeout));

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Disconnected);
        assert_eq!(
            h.transport
                .count_calls(|c| matches!(c, TransportCall::ProbeHost { .. })),
            0
        );
    }

    #[tokio::test]
    async fn decrypt_failure_deletes_key_and_falls_back_to_disconnected() {
        let record = peer(ConnectState::Connecting, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]).with_key();
        h.transport.queue_heartbeat(Err(TransportError::DecryptFail));

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert!(!h.secure.contains(&AppInstanceId::new(PEER)));
        assert_eq!(h.stored().await.connect_state, ConnectState::Disconnected);
        assert_eq!(
            h.transport
                .count_calls(|c| matches!(c, TransportCall::ProbeHost { .. })),
            1
        );
    }

    #[tokio::test]
    async fn decrypt_failure_falls_through_to_cached_token() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]).with_key();
        h.tokens.set_token(AppInstanceId::new(PEER), 654321);
        h.transport.queue_heartbeat(Err(TransportError::DecryptFail));
        h.transport.queue_trust(Ok(true));
        h.transport
            .queue_heartbeat(Ok(Some(VersionRelation::EqualTo)));

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert!(!h.secure.contains(&AppInstanceId::new(PEER)));
        assert!(!h.tokens.contains(&AppInstanceId::new(PEER)));
        assert_eq!(h.stored().await.connect_state, ConnectState::Connected);
        assert_eq!(
            h.transport.calls(),
            vec![
                TransportCall::Heartbeat {
                    host: "192.168.1.100".into()
                },
                TransportCall::Trust {
                    host: "192.168.1.100".into(),
                    token: 654321
                },
                TransportCall::Heartbeat {
                    host: "192.168.1.100".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn encrypt_failure_deletes_key_and_falls_back_to_unverified() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]).with_key();
        h.transport.queue_heartbeat(Err(TransportError::EncryptFail));
        h.transport
            .set_host_relation("192.168.1.100", VersionRelation::EqualTo);

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert!(!h.secure.contains(&AppInstanceId::new(PEER)));
        assert_eq!(h.stored().await.connect_state, ConnectState::Unverified);
    }

    #[tokio::test]
    async fn cached_token_trusts_without_pairing() {
        let record = peer(ConnectState::Connecting, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);
        h.tokens.set_token(AppInstanceId::new(PEER), 654321);
        h.transport.queue_trust(Ok(true));
        h.transport
            .queue_heartbeat(Ok(Some(VersionRelation::EqualTo)));

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Connected);
        assert!(!h.tokens.contains(&AppInstanceId::new(PEER)));
        assert!(h.transport.calls().contains(&TransportCall::Trust {
            host: "192.168.1.100".into(),
            token: 654321
        }));
    }

    #[tokio::test]
    async fn failed_cached_token_falls_back_to_probe() {
        let record = peer(ConnectState::Connecting, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);
        h.tokens.set_token(AppInstanceId::new(PEER), 654321);
        h.transport.queue_trust(Err(TransportError::TokenRejected));
        h.transport
            .set_host_relation("192.168.1.100", VersionRelation::EqualTo);

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Unverified);
        assert!(!h.tokens.contains(&AppInstanceId::new(PEER)));
    }

    #[tokio::test]
    async fn keyless_probe_mismatch_becomes_incompatible() {
        let record = peer(ConnectState::Connecting, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);
        h.transport
            .set_host_relation("192.168.1.100", VersionRelation::HigherThan);

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Incompatible);
        assert_eq!(
            h.transport
                .count_calls(|c| matches!(c, TransportCall::Heartbeat { .. })),
            0
        );
    }

    #[tokio::test]
    async fn keyless_unreachable_becomes_disconnected() {
        let record = peer(ConnectState::Connecting, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);

        h.resolver.resolve_connecting(&record).await.unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Disconnected);
    }

    // ===========================================
    // resolve_connection / force_resolve_connection
    // ===========================================

    #[tokio::test]
    async fn resolve_connection_dispatches_on_stored_state() {
        let h = Harness::new(vec![peer(ConnectState::Connected, Some("192.168.1.100"))]).with_key();
        h.transport
            .queue_heartbeat(Ok(Some(VersionRelation::EqualTo)));

        let snapshot = peer(ConnectState::Disconnected, None);
        let record = h.resolver.resolve_connection(&snapshot).await.unwrap().unwrap();

        assert_eq!(record.connect_state, ConnectState::Connected);
        assert_eq!(
            h.transport
                .count_calls(|c| matches!(c, TransportCall::Probe { .. })),
            0
        );
    }

    #[tokio::test]
    async fn force_resolve_refreshes_discovery_first() {
        let h = Harness::new(vec![peer(ConnectState::Disconnected, None)]);
        h.transport
            .set_probe_result(HostInfo::new("192.168.1.100", 24), VersionRelation::EqualTo);

        let record = h
            .resolver
            .force_resolve_connection(&peer(ConnectState::Disconnected, None))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.discovery.refresh_count(&AppInstanceId::new(PEER)), 1);
        assert_eq!(record.connect_state, ConnectState::Connecting);
    }

    #[tokio::test]
    async fn resolving_unknown_peer_is_noop() {
        let h = Harness::new(vec![]);
        let result = h
            .resolver
            .resolve_connection(&peer(ConnectState::Disconnected, None))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(h.transport.calls().is_empty());
    }

    // ===========================================
    // Trust and token display
    // ===========================================

    #[tokio::test]
    async fn trust_by_token_requires_unverified() {
        for state in [
            ConnectState::Disconnected,
            ConnectState::Connecting,
            ConnectState::Connected,
            ConnectState::Incompatible,
            ConnectState::Unmatched,
        ] {
            let record = peer(state, Some("192.168.1.100"));
            let h = Harness::new(vec![record.clone()]);
            let mut rx = h.store.stream_all_peers();
            rx.borrow_and_update();

            let trusted = h.resolver.trust_by_token(&record, 123456).await.unwrap();

            assert!(!trusted);
            assert!(h.transport.calls().is_empty());
            assert!(!rx.has_changed().unwrap());
        }
    }

    #[tokio::test]
    async fn trust_by_token_connects_unverified_peer() {
        let record = peer(ConnectState::Unverified, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);
        h.transport.queue_trust(Ok(true));
        h.transport
            .queue_heartbeat(Ok(Some(VersionRelation::EqualTo)));

        let (responder, answer) = Responder::channel();
        h.resolver
            .process(ResolveEvent::TrustByToken {
                info: record,
                token: 123456,
                responder,
            })
            .await;

        assert!(answer.await.unwrap());
        assert_eq!(h.stored().await.connect_state, ConnectState::Connected);
    }

    #[tokio::test]
    async fn trust_by_token_needs_an_address() {
        let record = peer(ConnectState::Unverified, None);
        let h = Harness::new(vec![record.clone()]);

        let (responder, answer) = Responder::channel();
        h.resolver
            .process(ResolveEvent::TrustByToken {
                info: record.clone(),
                token: 123456,
                responder,
            })
            .await;

        assert!(!answer.await.unwrap());
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.stored().await, record);
    }

    #[tokio::test]
    async fn rejected_token_leaves_state_unchanged() {
        let record = peer(ConnectState::Unverified, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);
        h.transport.queue_trust(Ok(false));

        assert!(!h.resolver.trust_by_token(&record, 1).await.unwrap());
        assert_eq!(h.stored().await, record);
    }

    #[tokio::test]
    async fn show_token_failure_disconnects() {
        let record = peer(ConnectState::Unverified, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);
        h.transport.set_show_token(Err(TransportError::Timeout));

        h.resolver.show_token(&record).await.unwrap();

        assert_eq!(h.stored().await.connect_state, ConnectState::Disconnected);
    }

    #[tokio::test]
    async fn show_token_only_for_unverified() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);

        h.resolver.show_token(&record).await.unwrap();

        assert!(h.transport.calls().is_empty());
        assert_eq!(h.stored().await.connect_state, ConnectState::Connected);
    }

    // ===========================================
    // Exit, removal, preferences
    // ===========================================

    #[tokio::test]
    async fn notify_exit_only_when_connected() {
        let connected = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![connected.clone()]);
        h.resolver.notify_exit(&connected).await.unwrap();
        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::NotifyExit {
                host: "192.168.1.100".into()
            }]
        );
        assert_eq!(h.stored().await.connect_state, ConnectState::Connected);

        let unverified = peer(ConnectState::Unverified, Some("192.168.1.100"));
        let h = Harness::new(vec![unverified.clone()]);
        h.resolver.notify_exit(&unverified).await.unwrap();
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn mark_exit_disconnects_and_keeps_address() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);

        h.resolver.mark_exit(&record).await.unwrap();

        let stored = h.stored().await;
        assert_eq!(stored.connect_state, ConnectState::Disconnected);
        assert_eq!(stored.connect_host_address.as_deref(), Some("192.168.1.100"));
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn remove_device_without_address_skips_notice() {
        let record = peer(ConnectState::Disconnected, None);
        let h = Harness::new(vec![record.clone()]).with_key();

        h.resolver.remove_device(&record).await.unwrap();

        assert!(!h.secure.contains(&AppInstanceId::new(PEER)));
        assert!(h.store.is_empty().unwrap());
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn remove_device_deletes_locally_even_if_notice_fails() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]).with_key();
        h.transport
            .fail_notifications(TransportError::Unreachable("down".into()));

        h.resolver.remove_device(&record).await.unwrap();

        assert!(!h.secure.contains(&AppInstanceId::new(PEER)));
        assert!(h.store.is_empty().unwrap());
        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::NotifyRemove {
                host: "192.168.1.100".into()
            }]
        );
    }

    #[tokio::test]
    async fn preference_events_update_single_fields() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);

        h.resolver
            .process(ResolveEvent::UpdateAllowSend {
                info: record.clone(),
                allow_send: false,
            })
            .await;
        h.resolver
            .process(ResolveEvent::UpdateAllowReceive {
                info: record.clone(),
                allow_receive: false,
            })
            .await;
        h.resolver
            .process(ResolveEvent::UpdateNoteName {
                info: record.clone(),
                note_name: "Office".into(),
            })
            .await;

        let stored = h.stored().await;
        assert!(!stored.allow_send);
        assert!(!stored.allow_receive);
        assert_eq!(stored.note_name.as_deref(), Some("Office"));
        assert_eq!(stored.connect_state, ConnectState::Connected);
    }

    #[tokio::test]
    async fn refresh_sync_info_only_nudges_discovery() {
        let h = Harness::new(vec![peer(ConnectState::Disconnected, None)]);

        h.resolver
            .process(ResolveEvent::RefreshSyncInfo {
                app_instance_id: AppInstanceId::new(PEER),
                host_info_list: vec![HostInfo::new("192.168.1.100", 24)],
            })
            .await;

        assert_eq!(h.discovery.refresh_count(&AppInstanceId::new(PEER)), 1);
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.stored().await, peer(ConnectState::Disconnected, None));
    }

    // ===========================================
    // Failure containment
    // ===========================================

    struct BrokenStore {
        snapshots: watch::Sender<Vec<SyncRuntimeInfo>>,
    }

    #[async_trait]
    impl PeerStore for BrokenStore {
        fn stream_all_peers(&self) -> watch::Receiver<Vec<SyncRuntimeInfo>> {
            self.snapshots.subscribe()
        }
        async fn get_peer(&self, _: &AppInstanceId) -> std::result::Result<Option<SyncRuntimeInfo>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn update_connection_fields(
            &self,
            _: &SyncRuntimeInfo,
        ) -> std::result::Result<Option<AppInstanceId>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn update_preference_fields(
            &self,
            _: &SyncRuntimeInfo,
        ) -> std::result::Result<Option<AppInstanceId>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn delete_peer(&self, _: &AppInstanceId) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn upsert_sync_info(
            &self,
            _: &SyncInfo,
        ) -> std::result::Result<SyncRuntimeInfo, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn store_failures_still_answer_callbacks() {
        let (snapshots, _) = watch::channel(Vec::new());
        let secure = Arc::new(MemorySecureStore::new());
        secure.save_public_key(AppInstanceId::new(PEER), vec![1]);
        let resolver = SyncResolver::new(
            Arc::new(BrokenStore { snapshots }),
            Arc::new(MockTransport::new()),
            Arc::new(MockDiscovery::new()),
            secure.clone(),
            Arc::new(TokenCache::default()),
            Arc::new(StaticSyncInfoFactory::new(sync_info("local", vec![]))),
        );
        let record = peer(ConnectState::Unverified, Some("192.168.1.100"));

        let (responder, trusted) = Responder::channel();
        resolver
            .process(ResolveEvent::TrustByToken {
                info: record.clone(),
                token: 1,
                responder,
            })
            .await;
        assert!(!trusted.await.unwrap());

        let (responder, relation) = Responder::channel();
        resolver
            .process(ResolveEvent::ResolveDisconnected {
                info: record.clone(),
                responder,
            })
            .await;
        assert_eq!(relation.await.unwrap(), None);

        resolver
            .process(ResolveEvent::RemoveDevice { info: record })
            .await;
        assert!(!secure.contains(&AppInstanceId::new(PEER)));
    }

    // ===========================================
    // Event loop
    // ===========================================

    #[tokio::test]
    async fn spawned_resolver_processes_peer_events_in_order() {
        let record = peer(ConnectState::Disconnected, None);
        let h = Harness::new(vec![record.clone()]);
        h.transport
            .set_probe_result(HostInfo::new("192.168.1.100", 24), VersionRelation::EqualTo);
        let handle = Arc::clone(&h.resolver).spawn();
        let emitter = handle.emitter();

        for name in ["first", "second", "third"] {
            emitter.emit(ResolveEvent::UpdateNoteName {
                info: record.clone(),
                note_name: name.into(),
            });
        }
        let (responder, done) = Responder::channel();
        emitter.emit(ResolveEvent::ResolveConnection {
            info: record.clone(),
            responder,
        });

        let resolved = tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(resolved.note_name.as_deref(), Some("third"));
        assert_eq!(resolved.connect_state, ConnectState::Connecting);

        handle.stop();
        handle.join().await;
        assert!(emitter.is_closed());
    }

    #[tokio::test]
    async fn spawned_resolver_serves_independent_peers() {
        let a = peer(ConnectState::Disconnected, None);
        let b = SyncRuntimeInfo::from_sync_info(&sync_info(
            "peer-b",
            vec![HostInfo::new("192.168.1.101", 24)],
        ));
        let h = Harness::new(vec![a.clone(), b.clone()]);
        let handle = Arc::clone(&h.resolver).spawn();
        let emitter = handle.emitter();

        let (ra, done_a) = Responder::channel();
        let (rb, done_b) = Responder::channel();
        emitter.emit(ResolveEvent::ResolveDisconnected {
            info: a,
            responder: ra,
        });
        emitter.emit(ResolveEvent::ResolveDisconnected {
            info: b,
            responder: rb,
        });

        let (ra, rb) = tokio::join!(done_a, done_b);
        assert_eq!(ra.unwrap(), None);
        assert_eq!(rb.unwrap(), None);
        assert_eq!(
            h.transport
                .count_calls(|c| matches!(c, TransportCall::Probe { .. })),
            2
        );
        handle.stop();
    }

    /// Delegates to a [`MockTransport`], with a slow remove notice and an
    /// optional one-time panic in `probe_compatibility`.
    struct SlowTransport {
        inner: MockTransport,
        remove_delay: Duration,
        removed: Arc<AtomicBool>,
        panic_once: AtomicBool,
    }

    impl SlowTransport {
        fn new(inner: MockTransport) -> Self {
            Self {
                inner,
                remove_delay: Duration::ZERO,
                removed: Arc::new(AtomicBool::new(false)),
                panic_once: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PeerTransport for SlowTransport {
        async fn probe_compatibility(
            &self,
            hosts: &[HostInfo],
            target: &AppInstanceId,
            port: u16,
        ) -> Option<(HostInfo, VersionRelation)> {
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("transport blew up");
            }
            self.inner.probe_compatibility(hosts, target, port).await
        }

        async fn probe_single_host(&self, endpoint: &PeerEndpoint) -> Option<VersionRelation> {
            self.inner.probe_single_host(endpoint).await
        }

        async fn heartbeat(
            &self,
            local: &SyncInfo,
            endpoint: &PeerEndpoint,
        ) -> std::result::Result<Option<VersionRelation>, TransportError> {
            self.inner.heartbeat(local, endpoint).await
        }

        async fn trust(
            &self,
            endpoint: &PeerEndpoint,
            token: u32,
        ) -> std::result::Result<bool, TransportError> {
            self.inner.trust(endpoint, token).await
        }

        async fn show_token(
            &self,
            endpoint: &PeerEndpoint,
        ) -> std::result::Result<bool, TransportError> {
            self.inner.show_token(endpoint).await
        }

        async fn notify_exit(
            &self,
            endpoint: &PeerEndpoint,
        ) -> std::result::Result<(), TransportError> {
            self.inner.notify_exit(endpoint).await
        }

        async fn notify_remove(
            &self,
            endpoint: &PeerEndpoint,
        ) -> std::result::Result<(), TransportError> {
            tokio::time::sleep(self.remove_delay).await;
            self.removed.store(true, Ordering::SeqCst);
            self.inner.notify_remove(endpoint).await
        }
    }

    async fn wait_for_idle(handle: &ResolverHandle) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.active_lanes() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("lanes should drain");
    }

    #[tokio::test]
    async fn events_after_removal_wait_for_the_removal() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let mock = MockTransport::new();
        let mut slow = SlowTransport::new(mock.clone());
        slow.remove_delay = Duration::from_millis(300);
        let removed = Arc::clone(&slow.removed);
        let h = Harness::wired(vec![record.clone()], mock, Arc::new(slow));
        let handle = Arc::clone(&h.resolver).spawn();
        let emitter = handle.emitter();

        emitter.emit(ResolveEvent::RemoveDevice {
            info: record.clone(),
        });
        let (responder, done) = Responder::channel();
        emitter.emit(ResolveEvent::ForceResolveConnection {
            info: record,
            responder,
        });

        let resolved = tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .unwrap()
            .unwrap();
        assert!(removed.load(Ordering::SeqCst));
        assert!(resolved.is_none());
        handle.stop();
    }

    #[tokio::test]
    async fn idle_lanes_are_closed() {
        let record = peer(ConnectState::Connected, Some("192.168.1.100"));
        let h = Harness::new(vec![record.clone()]);
        let handle = Arc::clone(&h.resolver).spawn();
        let emitter = handle.emitter();

        emitter.emit(ResolveEvent::RemoveDevice {
            info: record.clone(),
        });
        emitter.emit(ResolveEvent::MarkExit {
            info: record.clone(),
        });
        wait_for_idle(&handle).await;
        assert!(h.store.is_empty().unwrap());

        // A later event for the same peer opens a fresh lane.
        let (responder, done) = Responder::channel();
        emitter.emit(ResolveEvent::ResolveConnection {
            info: record,
            responder,
        });
        assert!(done.await.unwrap().is_none());
        wait_for_idle(&handle).await;
        handle.stop();
    }

    #[tokio::test]
    async fn panicking_event_still_answers_and_lane_survives() {
        let record = peer(ConnectState::Disconnected, None);
        let mock = MockTransport::new();
        let slow = SlowTransport::new(mock.clone());
        slow.panic_once.store(true, Ordering::SeqCst);
        let h = Harness::wired(vec![record.clone()], mock, Arc::new(slow));
        h.transport
            .set_probe_result(HostInfo::new("192.168.1.100", 24), VersionRelation::EqualTo);
        let handle = Arc::clone(&h.resolver).spawn();
        let emitter = handle.emitter();

        let (first, panicked) = Responder::channel();
        emitter.emit(ResolveEvent::ResolveDisconnected {
            info: record.clone(),
            responder: first,
        });
        let (second, served) = Responder::channel();
        emitter.emit(ResolveEvent::ResolveDisconnected {
            info: record,
            responder: second,
        });

        assert_eq!(panicked.await.unwrap(), None);
        assert_eq!(served.await.unwrap(), Some(VersionRelation::EqualTo));
        assert_eq!(h.stored().await.connect_state, ConnectState::Connecting);
        handle.stop();
    }
}
