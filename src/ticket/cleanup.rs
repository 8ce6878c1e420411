//! Background ticket reclamation.
//!
//! Expiration is lazy, so tickets nobody touches again would stay in the
//! registry forever. This task periodically sweeps them out.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::lifecycle::TicketLifecycleEngine;

/// Spawn a background task that periodically sweeps dead tickets.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_cleanup_task(
    engine: Arc<TicketLifecycleEngine>,
    cleanup_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(cleanup_interval_secs.max(1)));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match engine.sweep() {
                Ok(count) if count > 0 => {
                    info!(removed = count, "Ticket cleanup completed");
                }
                Ok(_) => {
                    debug!("Ticket cleanup: nothing to remove");
                }
                Err(e) => {
                    warn!(error = %e, "Ticket cleanup failed");
                }
            }

            match engine.count() {
                Ok(count) => {
                    debug!(tickets = count, "Ticket registry status");
                }
                Err(e) => {
                    debug!(error = %e, "Failed to get ticket count");
                }
            }
        }
    })
}
