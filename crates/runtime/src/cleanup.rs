//! Periodic retention sweep over the memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mesh_memory::MemoryManager;

/// Run `MemoryManager::cleanup` every `interval` until `shutdown` flips to
/// `true`.  The first sweep happens one interval after start.
pub fn spawn_cleanup_task(
    memory: Arc<MemoryManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match memory.cleanup(Utc::now()).await {
                        Ok(report) if report.turns_removed + report.events_removed > 0 => {
                            info!(
                                turns = report.turns_removed,
                                events = report.events_removed,
                                "retention cleanup complete"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => warn!(?err, "retention cleanup failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("cleanup task stopped");
    })
}
