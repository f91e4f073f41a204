//! Background upkeep for the registry.
//!
//! Periodically retries watchers that failed to start and picks up world
//! directories created after startup.

use playervault_core::RegistryManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to the running maintenance loop.
pub struct RegistryMaintenance {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RegistryMaintenance {
    /// Start the loop. The first pass runs one `interval` after spawning.
    pub fn spawn(registry: Arc<Mutex<RegistryManager>>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => {
                        debug!("Registry maintenance stopping");
                        break;
                    }
                    _ = ticker.tick() => run_once(&registry).await,
                }
            }
        });

        info!("Registry maintenance every {:?}", interval);
        Self { stop_tx, task }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!("Registry maintenance ended abnormally: {}", e);
        }
    }
}

/// One maintenance pass: retry failed watchers, then look for new worlds.
pub async fn run_once(registry: &Mutex<RegistryManager>) {
    let mut manager = registry.lock().await;

    match manager.retry_failed_watchers().await {
        Ok(0) => {}
        Ok(started) => info!("Started {} previously failed watcher(s)", started),
        Err(e) => warn!("Retrying failed watchers: {}", e),
    }

    match manager.discover_new_worlds().await {
        Ok(added) if added.is_empty() => {}
        Ok(added) => info!("Discovered new world(s): {}", added.join(", ")),
        Err(e) => warn!("World discovery failed: {}", e),
    }
}
