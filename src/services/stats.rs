//! Bucket usage aggregator.
//!
//! A cache-aside store of per-bucket totals. Reads return whatever is cached
//! and never wait on a scan. A refresh runs one full flat walk of the bucket
//! in a background task; concurrent refreshes of the same bucket join that
//! task instead of starting another. Scans across buckets are bounded by a
//! semaphore.
//!
//! The cached value is an `Arc` swapped under a short write lock, so size,
//! count and timestamp are always observed together.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    models::stats::{BucketStats, BucketStatsView, ScanFailure},
    services::hierarchy::HierarchyEngine,
};
use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::{Mutex, RwLock};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SharedScan = Shared<BoxFuture<'static, ConsoleResult<BucketStats>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsPolicy {
    /// Cached figures older than this are reported stale.
    pub freshness_window: Duration,
    /// Upper bound on scans running at once across all buckets.
    pub max_concurrent_scans: usize,
}

impl Default for StatsPolicy {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(300),
            max_concurrent_scans: 4,
        }
    }
}

#[derive(Default)]
struct CachedStats {
    stats: Option<BucketStats>,
    /// Mutation counter observed when the scan behind `stats` started.
    generation: u64,
    last_failure: Option<ScanFailure>,
}

struct InFlightScan {
    id: u64,
    result: SharedScan,
    cancel: CancellationToken,
}

#[derive(Default)]
struct BucketSlot {
    cached: RwLock<Arc<CachedStats>>,
    mutations: AtomicU64,
    inflight: Mutex<Option<InFlightScan>>,
}

impl BucketSlot {
    fn seeded(stats: BucketStats) -> Self {
        Self {
            cached: RwLock::new(Arc::new(CachedStats {
                stats: Some(stats),
                ..Default::default()
            })),
            ..Default::default()
        }
    }
}

pub struct StatsAggregator {
    hierarchy: HierarchyEngine,
    policy: StatsPolicy,
    slots: DashMap<String, Arc<BucketSlot>>,
    permits: Arc<Semaphore>,
    scan_ids: AtomicU64,
}

impl StatsAggregator {
    pub fn new(hierarchy: HierarchyEngine, policy: StatsPolicy) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(policy.max_concurrent_scans.max(1))),
            hierarchy,
            policy,
            slots: DashMap::new(),
            scan_ids: AtomicU64::new(0),
        }
    }

    pub fn hierarchy(&self) -> &HierarchyEngine {
        &self.hierarchy
    }

    /// Number of scans started since creation.
    pub fn scans_started(&self) -> u64 {
        self.scan_ids.load(Ordering::SeqCst)
    }

    fn slot(&self, bucket: &str) -> Arc<BucketSlot> {
        self.slots.entry(bucket.to_string()).or_default().clone()
    }

    /// Cached figures for `bucket` with their staleness. Never scans.
    pub fn get_stats(&self, bucket: &str) -> BucketStatsView {
        let slot = self.slots.get(bucket).map(|entry| entry.value().clone());
        let Some(slot) = slot else {
            return BucketStatsView {
                bucket: bucket.to_string(),
                total_size: 0,
                total_objects: 0,
                computed_at: None,
                stale: true,
                refreshing: false,
                last_error: None,
            };
        };

        let cached = slot.cached.read().clone();
        let mutated = cached.generation != slot.mutations.load(Ordering::SeqCst);
        let stale = match &cached.stats {
            None => true,
            Some(stats) => mutated || self.is_expired(stats),
        };
        let refreshing = slot.inflight.lock().is_some();

        BucketStatsView {
            bucket: bucket.to_string(),
            total_size: cached.stats.map_or(0, |s| s.total_size),
            total_objects: cached.stats.map_or(0, |s| s.total_objects),
            computed_at: cached.stats.map(|s| s.computed_at),
            stale,
            refreshing,
            last_error: cached.last_failure.clone(),
        }
    }

    fn is_expired(&self, stats: &BucketStats) -> bool {
        let window = TimeDelta::from_std(self.policy.freshness_window).unwrap_or(TimeDelta::MAX);
        Utc::now() - stats.computed_at > window
    }

    /// Record that the bucket changed since the cached figures were taken.
    pub fn mark_stale(&self, bucket: &str) {
        self.slot(bucket).mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Cache exact figures for a bucket known to be empty.
    pub fn seed_empty(&self, bucket: &str) {
        let stats = BucketStats {
            total_size: 0,
            total_objects: 0,
            computed_at: Utc::now(),
        };
        self.slots
            .insert(bucket.to_string(), Arc::new(BucketSlot::seeded(stats)));
    }

    /// Drop everything cached for `bucket` and cancel its in-flight scan.
    pub fn invalidate(&self, bucket: &str) {
        if let Some((_, slot)) = self.slots.remove(bucket) {
            if let Some(scan) = slot.inflight.lock().take() {
                scan.cancel.cancel();
                info!(bucket = %bucket, scan = scan.id, "cancelled in-flight stats scan");
            }
        }
    }

    /// Recompute the bucket's figures, joining a scan already in flight.
    pub async fn refresh(&self, bucket: &str) -> ConsoleResult<BucketStats> {
        self.start_or_join(bucket).await
    }

    /// Start (or join) a scan without waiting for it.
    pub fn request_refresh(&self, bucket: &str) {
        let _scan = self.start_or_join(bucket);
    }

    fn start_or_join(&self, bucket: &str) -> SharedScan {
        let slot = self.slot(bucket);
        let mut inflight = slot.inflight.lock();
        if let Some(scan) = inflight.as_ref() {
            debug!(bucket = %bucket, scan = scan.id, "joining in-flight stats scan");
            return scan.result.clone();
        }

        let id = self.scan_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let job = ScanJob {
            id,
            bucket: bucket.to_string(),
            slot: slot.clone(),
            hierarchy: self.hierarchy.clone(),
            permits: self.permits.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(job.run());

        let bucket_name = bucket.to_string();
        let result = async move {
            handle.await.unwrap_or_else(|err| {
                Err(ConsoleError::ScanAborted {
                    bucket: bucket_name,
                    reason: format!("scan task failed: {err}"),
                })
            })
        }
        .boxed()
        .shared();

        debug!(bucket = %bucket, scan = id, "started stats scan");
        *inflight = Some(InFlightScan {
            id,
            result: result.clone(),
            cancel,
        });
        result
    }
}

/// One full scan of one bucket, run on its own task.
struct ScanJob {
    id: u64,
    bucket: String,
    slot: Arc<BucketSlot>,
    hierarchy: HierarchyEngine,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ScanJob {
    async fn run(self) -> ConsoleResult<BucketStats> {
        let outcome = self.scan().await;
        self.finish(&outcome);
        outcome
    }

    fn aborted(&self, reason: &str) -> ConsoleError {
        ConsoleError::ScanAborted {
            bucket: self.bucket.clone(),
            reason: reason.to_string(),
        }
    }

    async fn scan(&self) -> ConsoleResult<BucketStats> {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(self.aborted("cancelled")),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| self.aborted("scan limiter closed"))?
            }
        };

        let generation = self.slot.mutations.load(Ordering::SeqCst);
        let started = Instant::now();
        let delimiter = self.hierarchy.codec().delimiter();
        let mut total_size: u64 = 0;
        let mut total_objects: u64 = 0;
        let walked = self
            .hierarchy
            .walk(&self.bucket, "", &self.cancel, |entry| {
                // Folder placeholders are not files.
                if entry.key.ends_with(delimiter) {
                    return;
                }
                total_size = total_size.saturating_add(entry.size);
                total_objects += 1;
            })
            .await?;

        if self.cancel.is_cancelled() {
            return Err(self.aborted("cancelled"));
        }

        let stats = BucketStats {
            total_size,
            total_objects,
            computed_at: Utc::now(),
        };
        *self.slot.cached.write() = Arc::new(CachedStats {
            stats: Some(stats),
            generation,
            last_failure: None,
        });

        info!(
            bucket = %self.bucket,
            scan = self.id,
            total_size,
            total_objects,
            pages = walked.pages,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stats scan completed"
        );
        Ok(stats)
    }

    /// Record a failure (keeping the last good figures) and release the
    /// in-flight marker if it is still ours.
    fn finish(&self, outcome: &ConsoleResult<BucketStats>) {
        if let Err(err) = outcome {
            if self.cancel.is_cancelled() {
                debug!(bucket = %self.bucket, scan = self.id, "stats scan discarded after cancellation");
            } else {
                warn!(bucket = %self.bucket, scan = self.id, error = %err, "stats scan failed");
                let mut cached = self.slot.cached.write();
                *cached = Arc::new(CachedStats {
                    stats: cached.stats,
                    generation: cached.generation,
                    last_failure: Some(ScanFailure {
                        at: Utc::now(),
                        message: err.to_string(),
                    }),
                });
            }
        }

        let mut inflight = self.slot.inflight.lock();
        if inflight.as_ref().is_some_and(|scan| scan.id == self.id) {
            *inflight = None;
        }
    }
}
