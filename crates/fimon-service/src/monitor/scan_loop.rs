//! Periodic scan loop.
//!
//! Runs one pass right away, then one pass per period until shutdown. Passes
//! never overlap and a shutdown request is only observed between passes, so
//! the pass in flight always completes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Monitor, ScanReport};

pub struct ScanLoopHandle {
    /// Send `true` to stop after the current pass.
    pub shutdown_tx: watch::Sender<bool>,
}

impl ScanLoopHandle {
    pub fn shutdown(&self) {
        // the loop may already be gone; nothing to do then
        let _ = self.shutdown_tx.send(true);
    }
}

/// Spawns the loop. `on_report` sees the report of every finished pass.
pub fn spawn_scan_loop<F>(
    monitor: Arc<Monitor>,
    period: Duration,
    on_report: F,
) -> (JoinHandle<()>, ScanLoopHandle)
where
    F: Fn(ScanReport) + Send + Sync + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(period_secs = period.as_secs(), "scan loop started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let report = monitor.run_pass().await;
            on_report(report);

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown_rx.changed() => {
                    // a dropped sender also ends the loop
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    debug!("scan loop woken without shutdown");
                }
            }
        }
        info!("scan loop stopped");
    });

    (handle, ScanLoopHandle { shutdown_tx })
}
