//! Periodic re-resolution driver.
//!
//! Runs an action on the [`PollingBackoff`] curve: every base interval while
//! things work, sooner after failures. Independent of event-driven triggers.

use crate::config::PollingConfig;
use clipsync_core::PollingBackoff;
use futures_util::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Polling loop with a shared failure counter.
#[derive(Debug, Default)]
pub struct SyncPollingManager {
    backoff: Mutex<PollingBackoff>,
}

impl SyncPollingManager {
    /// Create a manager over `backoff`.
    pub fn new(backoff: PollingBackoff) -> Self {
        Self {
            backoff: Mutex::new(backoff),
        }
    }

    /// Create a manager from the `[polling]` configuration section.
    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(config.backoff())
    }

    /// Record a failure; the next poll comes sooner.
    pub fn fail(&self) {
        self.lock().fail();
    }

    /// Clear failures; polling returns to the base interval.
    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Delay before the next poll.
    pub fn next_delay(&self) -> Duration {
        self.lock().delay()
    }

    /// Consecutive failures recorded.
    pub fn failures(&self) -> u32 {
        self.lock().failures()
    }

    /// Run `action` repeatedly until `cancel` fires.
    ///
    /// The delay is re-read before every sleep, so `fail`/`reset` calls made
    /// by the action take effect on the next round. Errors and panics in
    /// the action are logged and the loop continues.
    pub fn start_polling_resolve<F, Fut, E>(
        self: &Arc<Self>,
        cancel: CancellationToken,
        action: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "Polling started (interval: {}s)",
                manager.next_delay().as_secs()
            );

            loop {
                let delay = manager.next_delay();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if cancel.is_cancelled() {
                    break;
                }

                match AssertUnwindSafe(action()).catch_unwind().await {
                    Ok(Ok(())) => tracing::debug!("Poll finished"),
                    Ok(Err(e)) => tracing::warn!("Poll failed: {}", e),
                    Err(_) => tracing::error!("Poll action panicked"),
                }
            }

            tracing::info!("Polling stopped");
        })
    }

    fn lock(&self) -> MutexGuard<'_, PollingBackoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
