//! SyncManager - registry of per-peer handlers.
//!
//! The manager follows the peer store's snapshot stream and keeps exactly one
//! [`PeerSyncHandler`] per stored peer. It also drives the polling loop and
//! fans consumer calls out to the handlers.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::event::Emitter;
use crate::handler::PeerSyncHandler;
use crate::polling::SyncPollingManager;
use crate::store::PeerStore;
use clipsync_types::{AppInstanceId, SyncInfo, SyncRuntimeInfo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Top-level sync registry. Cheap to clone.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: Arc<dyn PeerStore>,
    emitter: Emitter,
    config: EngineConfig,
    handlers: DashMap<AppInstanceId, Arc<PeerSyncHandler>>,
    runtime_infos: watch::Sender<Vec<SyncRuntimeInfo>>,
    polling: Arc<SyncPollingManager>,
    running: Mutex<Option<CancellationToken>>,
}

impl SyncManager {
    /// Create a stopped manager.
    ///
    /// `emitter` is the resolver's event channel, shared by every handler.
    pub fn new(store: Arc<dyn PeerStore>, emitter: Emitter, config: EngineConfig) -> Self {
        let (runtime_infos, _) = watch::channel(Vec::new());
        let polling = Arc::new(SyncPollingManager::from_config(&config.polling));
        Self {
            inner: Arc::new(ManagerInner {
                store,
                emitter,
                config,
                handlers: DashMap::new(),
                runtime_infos,
                polling,
                running: Mutex::new(None),
            }),
        }
    }

    /// Follow the peer store and start polling. A second call is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let cancel = {
            let mut running = self.inner.lock_running();
            if running.is_some() {
                tracing::debug!("Sync manager already started");
                return;
            }
            let cancel = CancellationToken::new();
            *running = Some(cancel.clone());
            cancel
        };

        tracing::info!("Sync manager started");
        let rx = self.inner.store.stream_all_peers();
        tokio::spawn(follow_store(
            Arc::downgrade(&self.inner),
            rx,
            cancel.clone(),
        ));

        // Background tasks hold the manager weakly; dropping it cancels them.
        let inner = Arc::downgrade(&self.inner);
        self.inner
            .polling
            .start_polling_resolve(cancel, move || {
                let inner = inner.clone();
                async move {
                    if let Some(inner) = inner.upgrade() {
                        SyncManager { inner }.poll_once().await;
                    }
                    Ok::<(), Infallible>(())
                }
            });
    }

    /// Cancel the subscription, the polling loop and every handler.
    ///
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        let mut running = self.inner.lock_running();
        if let Some(cancel) = running.take() {
            cancel.cancel();
            tracing::info!("Sync manager stopped");
        }
        for entry in self.inner.handlers.iter() {
            entry.value().stop();
        }
        self.inner.handlers.clear();
    }

    /// Whether [`start`](Self::start) is in effect.
    pub fn is_running(&self) -> bool {
        self.inner.lock_running().is_some()
    }

    /// Build a handler for `record` without registering it.
    ///
    /// While the manager runs, the handler also stops with it.
    pub fn create_sync_handler(&self, record: SyncRuntimeInfo) -> PeerSyncHandler {
        let cancel = self.inner.handler_token();
        self.inner.create_sync_handler(record, cancel)
    }

    /// Tear down the handler for `id`, marking the peer disconnected.
    pub fn remove_sync_handler(&self, id: &AppInstanceId) {
        self.inner.remove_sync_handler(id);
    }

    /// Record an announcement from discovery or pairing and re-resolve.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the upsert.
    pub async fn update_sync_info(&self, info: SyncInfo) -> Result<()> {
        let record = self.inner.store.upsert_sync_info(&info).await?;
        let handler = self.inner.get_or_create(record.clone());
        handler.update_sync_runtime_info(record);
        handler.resolve();
        Ok(())
    }

    /// Pair with `id` using `token`. `false` if the peer has no handler.
    pub async fn trust_by_token(&self, id: &AppInstanceId, token: u32) -> bool {
        match self.get_sync_handler(id) {
            Some(handler) => handler.trust_by_token(token).await,
            None => {
                tracing::debug!("No handler for {}, ignoring token", id);
                false
            }
        }
    }

    /// Force re-resolution of `ids` (all peers when `None`).
    ///
    /// Completes once every resolution finished and returns the resulting
    /// records.
    pub async fn refresh(&self, ids: Option<&[AppInstanceId]>) -> Vec<SyncRuntimeInfo> {
        let handlers = match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.get_sync_handler(id))
                .collect(),
            None => self.get_sync_handlers(),
        };
        join_all(handlers.iter().map(|handler| handler.force_resolve()))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Send an exit notice to every connected peer and wait for all attempts.
    pub async fn notify_exit(&self) {
        let handlers = self.get_sync_handlers();
        join_all(handlers.iter().map(|handler| handler.notify_exit())).await;
    }

    /// Mark every peer disconnected.
    pub fn mark_all_exit(&self) {
        for handler in self.get_sync_handlers() {
            handler.mark_exit();
        }
    }

    /// Application shutdown: notify peers, mark them disconnected, stop.
    pub async fn shutdown(&self) {
        self.notify_exit().await;
        self.mark_all_exit();
        self.stop();
    }

    /// Forget the peer `id`. No-op without a handler.
    pub fn remove_device(&self, id: &AppInstanceId) {
        if let Some(handler) = self.get_sync_handler(id) {
            handler.remove_device();
        }
    }

    /// All live handlers.
    pub fn get_sync_handlers(&self) -> Vec<Arc<PeerSyncHandler>> {
        self.inner
            .handlers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// The handler for `id`.
    pub fn get_sync_handler(&self, id: &AppInstanceId) -> Option<Arc<PeerSyncHandler>> {
        self.inner
            .handlers
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Observable view of every stored peer record.
    pub fn runtime_infos(&self) -> watch::Receiver<Vec<SyncRuntimeInfo>> {
        self.inner.runtime_infos.subscribe()
    }

    /// The polling loop's backoff state.
    pub fn polling(&self) -> &SyncPollingManager {
        &self.inner.polling
    }

    async fn poll_once(&self) {
        let records = self.refresh(None).await;
        if records
            .iter()
            .any(|record| record.connect_state.is_disconnected())
        {
            self.inner.polling.fail();
        } else {
            self.inner.polling.reset();
        }
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("handlers", &self.inner.handlers.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ManagerInner {
    fn lock_running(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Child of the running token, or a standalone token when stopped.
    ///
    /// Never call while holding a `handlers` entry; `reconcile` takes the
    /// running lock first.
    fn handler_token(&self) -> CancellationToken {
        self.lock_running()
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default()
    }

    fn create_sync_handler(
        &self,
        record: SyncRuntimeInfo,
        cancel: CancellationToken,
    ) -> PeerSyncHandler {
        PeerSyncHandler::with_cancel(
            record,
            self.emitter.clone(),
            self.config.resolver.connect_address_timeout(),
            cancel,
        )
    }

    fn get_or_create(&self, record: SyncRuntimeInfo) -> Arc<PeerSyncHandler> {
        let id = record.app_instance_id().clone();
        let cancel = self.handler_token();
        let entry = self.handlers.entry(id).or_insert_with(|| {
            tracing::info!("Created handler for {}", record.app_instance_id());
            Arc::new(self.create_sync_handler(record, cancel))
        });
        Arc::clone(entry.value())
    }

    fn remove_sync_handler(&self, id: &AppInstanceId) {
        if let Some((_, handler)) = self.handlers.remove(id) {
            handler.mark_exit();
            handler.stop();
            tracing::info!("Removed handler for {}", id);
        }
    }

    fn reconcile(&self, snapshot: Vec<SyncRuntimeInfo>, cancel: &CancellationToken) {
        // Serialized against stop() so a late snapshot cannot revive handlers.
        let _running = self.lock_running();
        if cancel.is_cancelled() {
            return;
        }

        let live: HashSet<&AppInstanceId> =
            snapshot.iter().map(SyncRuntimeInfo::app_instance_id).collect();
        let stale: Vec<AppInstanceId> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| !live.contains(id))
            .collect();
        for id in &stale {
            self.remove_sync_handler(id);
        }

        for record in &snapshot {
            match self.handlers.entry(record.app_instance_id().clone()) {
                Entry::Occupied(entry) => entry.get().update_sync_runtime_info(record.clone()),
                Entry::Vacant(entry) => {
                    tracing::info!("Created handler for {}", record.app_instance_id());
                    let handler = self.create_sync_handler(record.clone(), cancel.child_token());
                    entry.insert(Arc::new(handler));
                }
            }
        }

        self.runtime_infos.send_replace(snapshot);
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let running = self.running.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancel) = running.take() {
            cancel.cancel();
            tracing::debug!("Sync manager dropped while running");
        }
        for entry in self.handlers.iter() {
            entry.value().stop();
        }
    }
}

async fn follow_store(
    inner: Weak<ManagerInner>,
    mut rx: watch::Receiver<Vec<SyncRuntimeInfo>>,
    cancel: CancellationToken,
) {
    loop {
        let snapshot = rx.borrow_and_update().clone();
        match inner.upgrade() {
            Some(inner) => inner.reconcile(snapshot, &cancel),
            None => break,
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("Peer store stream closed");
                    break;
                }
            }
        }
    }

    tracing::debug!("Stopped following peer store");
}
