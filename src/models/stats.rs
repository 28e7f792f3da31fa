//! Aggregate usage figures for buckets.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of one complete scan of a bucket.
///
/// Size and count are always produced together by the same scan and are
/// swapped into the cache as one value.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketStats {
    pub total_size: u64,
    pub total_objects: u64,
    pub computed_at: DateTime<Utc>,
}

/// Record of the most recent failed scan.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ScanFailure {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// What callers see when asking for a bucket's usage.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketStatsView {
    pub bucket: String,
    pub total_size: u64,
    pub total_objects: u64,
    /// `None` until the first scan of this bucket completes.
    pub computed_at: Option<DateTime<Utc>>,
    pub stale: bool,
    /// A scan for this bucket is currently in flight.
    pub refreshing: bool,
    pub last_error: Option<ScanFailure>,
}

/// A bucket together with its cached usage.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketSummary {
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub stats: BucketStatsView,
    pub formatted_size: String,
}

/// Console-wide usage built from the stats cache.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StorageSummary {
    pub bucket_count: usize,
    pub total_size: u64,
    pub formatted_size: String,
    pub total_objects: u64,
    /// At least one bucket's figure is stale or was never computed.
    pub stale: bool,
}
