//! Periodic refresh of stale bucket figures.

use crate::services::stats::StatsAggregator;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Start a refresh for every bucket whose cached figures are stale and not
/// already being recomputed. Returns how many refreshes were requested.
pub async fn refresh_stale(stats: &StatsAggregator) -> usize {
    let buckets = match stats.hierarchy().store().list_buckets().await {
        Ok(buckets) => buckets,
        Err(err) => {
            warn!(error = %err, "could not list buckets for stats refresh");
            return 0;
        }
    };

    let mut requested = 0;
    for bucket in buckets {
        let view = stats.get_stats(&bucket.name);
        if view.stale && !view.refreshing {
            stats.request_refresh(&bucket.name);
            requested += 1;
        }
    }
    debug!(requested, "stale bucket refreshes requested");
    requested
}

/// Run [`refresh_stale`] every `interval` until `shutdown` fires.
pub fn spawn_refresher(
    stats: Arc<StatsAggregator>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "stats refresher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    refresh_stale(&stats).await;
                }
            }
        }
        info!("stats refresher stopped");
    })
}
