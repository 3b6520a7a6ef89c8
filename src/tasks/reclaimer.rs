//! Expiry Reclaimer
//!
//! Background task that periodically removes expired rows from every master
//! shard. Replicas are left alone; they converge through the backing store's
//! own replication.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::StoreCore;

/// Handle to the running reclaim loop.
///
/// Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct Reclaimer {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reclaimer {
    /// Spawns the loop. It sleeps for the purge interval, sweeps every
    /// master, and repeats until the store shuts down.
    ///
    /// A failed shard is logged and counted; the next tick retries it.
    pub(crate) fn spawn(core: Arc<StoreCore>) -> Self {
        let cancel = core.shutdown_token().child_token();
        let interval = core.purge_interval();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!("Starting expiry reclaimer with interval of {:?}", interval);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let report = match core.purge_expired(Some(&token)).await {
                    Ok(report) => report,
                    Err(e) => {
                        debug!("Expiry reclaim interrupted: {}", e);
                        break;
                    }
                };
                if !report.is_complete() {
                    warn!(
                        "Expiry reclaim: removed {} expired entries, failed shards {:?}",
                        report.removed, report.failed_shards
                    );
                } else if report.removed > 0 {
                    info!("Expiry reclaim: removed {} expired entries", report.removed);
                } else {
                    debug!("Expiry reclaim: no expired entries found");
                }
            }

            debug!("Expiry reclaimer stopped");
        });

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signals the loop to stop without waiting for it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops the loop and waits for the in-progress sweep, if any, to end.
    pub async fn join(&self) {
        self.stop();
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Expiry reclaimer ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
