//! Background removal of expired cache rows.
//!
//! Reads already ignore expired rows, so the sweeper only bounds storage
//! growth. It is off unless an interval is configured.

use crate::ports::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, warn};

/// Spawns a task that calls `purge_expired` every `interval`.
///
/// The first pass runs one full interval after start. Abort the returned
/// handle to stop it.
pub fn spawn_sweeper(store: Arc<dyn CacheStore>, interval: Duration) -> JoinHandle<()> {
    let span = info_span!("sweeper", interval_secs = interval.as_secs());

    tokio::spawn(
        async move {
            info!("starting expired-row sweeper");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match store.purge_expired().await {
                    Ok(0) => debug!("sweep found no expired rows"),
                    Ok(removed) => info!(removed, "swept expired rows"),
                    Err(e) => warn!(error = %e, "sweep failed"),
                }
            }
        }
        .instrument(span),
    )
}
