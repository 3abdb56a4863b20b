//! Background refresh sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::CredentialManager;

/// Default sweep cadence.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Spawn the periodic sweep that calls
/// [`refresh_all_if_needed`](CredentialManager::refresh_all_if_needed).
///
/// Failures inside the sweep are already logged and swallowed by the
/// manager, so the loop only ends on cancellation. Overlap with lazy or
/// forced refreshes is safe: concurrent refreshes of the same provider
/// collapse in the coordinator.
pub fn spawn_sweeper(
    manager: Arc<CredentialManager>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a sweep at startup is
        // the caller's decision, not ours.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("sweeper stopped");
                    return;
                }
                _ = interval.tick() => {
                    let refreshed = manager.refresh_all_if_needed().await;
                    if refreshed > 0 {
                        info!(refreshed, "sweep refreshed tokens");
                    }
                }
            }
        }
    })
}
