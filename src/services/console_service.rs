//! Console API layer: bucket management, browsing, uploads and usage figures.
//!
//! Every call validates its input with the path codec, delegates to the
//! hierarchy engine or the object store and reports mutations to the stats
//! aggregator.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    models::{
        browser::{BrowseResult, ObjectInfo},
        bucket::Bucket,
        object::ObjectEntry,
        stats::{BucketStatsView, BucketSummary, StorageSummary},
    },
    services::{
        archive::{FolderArchive, build_zip},
        format::{effective_content_type, format_bytes},
        hierarchy::HierarchyEngine,
        path_codec::{PathCodec, validate_bucket_name},
        stats::StatsAggregator,
        store::{ByteStream, ObjectStore, StoreError, collect_body},
    },
};
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owner recorded on buckets created through the console.
const CONSOLE_OWNER: &str = "console";

#[derive(Clone)]
pub struct ConsoleService {
    hierarchy: HierarchyEngine,
    stats: Arc<StatsAggregator>,
    refresh_on_mutation: bool,
}

impl ConsoleService {
    /// `refresh_on_mutation` starts a background scan after every upload or
    /// delete instead of only flagging the cached figures stale.
    pub fn new(stats: Arc<StatsAggregator>, refresh_on_mutation: bool) -> Self {
        Self {
            hierarchy: stats.hierarchy().clone(),
            stats,
            refresh_on_mutation,
        }
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.hierarchy.store()
    }

    fn codec(&self) -> &PathCodec {
        self.hierarchy.codec()
    }

    fn after_mutation(&self, bucket: &str) {
        self.stats.mark_stale(bucket);
        if self.refresh_on_mutation {
            self.stats.request_refresh(bucket);
        }
    }

    async fn ensure_bucket(&self, bucket: &str) -> ConsoleResult<Bucket> {
        Ok(self.store().head_bucket(bucket).await?)
    }

    pub async fn create_bucket(&self, name: &str) -> ConsoleResult<Bucket> {
        validate_bucket_name(name)?;
        let bucket = self.store().create_bucket(name, CONSOLE_OWNER).await?;
        self.stats.seed_empty(name);
        info!(bucket = %name, "bucket created");
        Ok(bucket)
    }

    /// Delete a bucket. Without `force` the bucket must hold no objects,
    /// folder placeholders included; the store checks that atomically with
    /// the removal.
    pub async fn delete_bucket(&self, name: &str, force: bool) -> ConsoleResult<()> {
        if force {
            // Stop any scan before the objects go.
            self.stats.invalidate(name);
        }
        self.store().delete_bucket(name, force).await?;
        // Drop whatever a scan started in between may have cached.
        self.stats.invalidate(name);
        info!(bucket = %name, force, "bucket deleted");
        Ok(())
    }

    /// All buckets ordered by name, each with its cached usage.
    pub async fn list_buckets(&self) -> ConsoleResult<Vec<BucketSummary>> {
        let buckets = self.store().list_buckets().await?;
        Ok(buckets
            .into_iter()
            .map(|bucket| {
                let stats = self.stats.get_stats(&bucket.name);
                BucketSummary {
                    formatted_size: format_bytes(stats.total_size),
                    name: bucket.name,
                    owner: bucket.owner,
                    created_at: bucket.created_at,
                    stats,
                }
            })
            .collect())
    }

    pub async fn browse(&self, bucket: &str, prefix: &str) -> ConsoleResult<BrowseResult> {
        let prefix = self.codec().normalize(prefix)?;
        let breadcrumbs = self.codec().breadcrumbs(&prefix)?;
        let listing = self.hierarchy.list(bucket, &prefix).await?;
        Ok(BrowseResult {
            bucket: bucket.to_string(),
            folder_count: listing.folders.len(),
            file_count: listing.files.len(),
            prefix,
            breadcrumbs,
            folders: listing.folders,
            files: listing.files,
        })
    }

    /// Returns the new folder's prefix.
    pub async fn create_folder(&self, bucket: &str, prefix: &str, name: &str) -> ConsoleResult<String> {
        let folder = self.hierarchy.create_folder(bucket, prefix, name).await?;
        info!(bucket = %bucket, prefix = %folder, "folder created");
        Ok(folder)
    }

    pub async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        body: ByteStream,
    ) -> ConsoleResult<ObjectEntry> {
        self.codec().object_key(key)?;
        let entry = self.store().put_object(bucket, key, content_type, body).await?;
        self.after_mutation(bucket);
        debug!(bucket = %bucket, key = %key, size = entry.size, "object uploaded");
        Ok(entry)
    }

    /// Store an uploaded file under `prefix`, keeping its file name.
    pub async fn upload_file(
        &self,
        bucket: &str,
        prefix: &str,
        file_name: &str,
        content_type: Option<String>,
        body: ByteStream,
    ) -> ConsoleResult<ObjectEntry> {
        let name = self.codec().folder_name(file_name).map_err(|_| {
            ConsoleError::invalid_name(file_name, "file name must be a single path component")
        })?;
        if file_name.ends_with(self.codec().delimiter()) {
            return Err(ConsoleError::invalid_name(file_name, "file name cannot end with the delimiter"));
        }
        let mut key = self.codec().normalize(prefix)?;
        key.push_str(name);
        self.upload_object(bucket, &key, content_type, body).await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> ConsoleResult<()> {
        self.store().delete_object(bucket, key).await?;
        self.after_mutation(bucket);
        debug!(bucket = %bucket, key = %key, "object deleted");
        Ok(())
    }

    /// Recursively delete everything under `prefix`. Returns the number of
    /// keys removed. Cached stats go stale as soon as one key is gone, even
    /// when a later delete fails.
    pub async fn delete_folder(&self, bucket: &str, prefix: &str) -> ConsoleResult<u64> {
        let outcome = self.hierarchy.delete_prefix(bucket, prefix).await?;
        if outcome.deleted > 0 {
            self.after_mutation(bucket);
        }
        if let Some(err) = outcome.failure {
            warn!(bucket = %bucket, prefix = %prefix, deleted = outcome.deleted, "folder delete stopped: {}", err);
            return Err(err);
        }
        info!(bucket = %bucket, prefix = %prefix, deleted = outcome.deleted, "folder deleted");
        Ok(outcome.deleted)
    }

    /// Pack every file under `prefix` into a ZIP named after the folder, or
    /// after the bucket at the root. Placeholders are skipped and entry
    /// paths are relative to `prefix`. Keys deleted while packing are left
    /// out; a folder with no files is `ObjectNotFound`.
    pub async fn download_folder_zip(&self, bucket: &str, prefix: &str) -> ConsoleResult<FolderArchive> {
        let prefix = self.codec().normalize(prefix)?;
        let delimiter = self.codec().delimiter();

        let mut keys = Vec::new();
        self.hierarchy
            .walk(bucket, &prefix, &CancellationToken::new(), |entry| {
                if !entry.key.ends_with(delimiter) {
                    keys.push(entry.key.clone());
                }
            })
            .await?;

        let mut entries: Vec<(String, Bytes)> = Vec::with_capacity(keys.len());
        for key in keys {
            let body = match self.store().get_object(bucket, &key).await {
                Ok((_, body)) => body,
                Err(StoreError::ObjectNotFound { .. }) => {
                    debug!(bucket = %bucket, key = %key, "object vanished before packing");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let data = collect_body(body).await.map_err(StoreError::from)?;
            entries.push((self.codec().relative_name(&prefix, &key).to_string(), data));
        }
        if entries.is_empty() {
            return Err(ConsoleError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: prefix,
            });
        }

        let count = entries.len();
        let data = tokio::task::spawn_blocking(move || build_zip(&entries))
            .await
            .map_err(|err| ConsoleError::Store(format!("archive task failed: {}", err)))?
            .map_err(|err| ConsoleError::Store(format!("building archive failed: {}", err)))?;

        let stem = if prefix.is_empty() { bucket } else { self.codec().leaf(&prefix) };
        info!(bucket = %bucket, prefix = %prefix, entries = count, size = data.len(), "folder archived");
        Ok(FolderArchive {
            file_name: format!("{}.zip", stem),
            entries: count,
            data: Bytes::from(data),
        })
    }

    /// Cached usage of one bucket. Never starts a scan.
    pub async fn get_bucket_stats(&self, bucket: &str) -> ConsoleResult<BucketStatsView> {
        self.ensure_bucket(bucket).await?;
        Ok(self.stats.get_stats(bucket))
    }

    /// Recompute the bucket's usage, joining a scan already running.
    pub async fn refresh_bucket_stats(&self, bucket: &str) -> ConsoleResult<BucketStatsView> {
        self.ensure_bucket(bucket).await?;
        self.stats.refresh(bucket).await?;
        Ok(self.stats.get_stats(bucket))
    }

    pub async fn object_info(&self, bucket: &str, key: &str) -> ConsoleResult<ObjectInfo> {
        let entry = self.store().head_object(bucket, key).await?;
        Ok(object_info(self.codec(), bucket, entry))
    }

    pub async fn download_object(&self, bucket: &str, key: &str) -> ConsoleResult<(ObjectInfo, ByteStream)> {
        let (entry, body) = self.store().get_object(bucket, key).await?;
        Ok((object_info(self.codec(), bucket, entry), body))
    }

    /// Console-wide totals taken from the stats cache.
    pub async fn storage_summary(&self) -> ConsoleResult<StorageSummary> {
        let buckets = self.store().list_buckets().await?;
        let mut summary = StorageSummary {
            bucket_count: buckets.len(),
            total_size: 0,
            formatted_size: String::new(),
            total_objects: 0,
            stale: false,
        };
        for bucket in &buckets {
            let stats = self.stats.get_stats(&bucket.name);
            summary.total_size = summary.total_size.saturating_add(stats.total_size);
            summary.total_objects += stats.total_objects;
            summary.stale |= stats.stale;
        }
        summary.formatted_size = format_bytes(summary.total_size);
        Ok(summary)
    }
}

fn object_info(codec: &PathCodec, bucket: &str, entry: ObjectEntry) -> ObjectInfo {
    ObjectInfo {
        bucket: bucket.to_string(),
        name: codec.leaf(&entry.key).to_string(),
        content_type: effective_content_type(&entry.key, entry.content_type.as_deref()),
        formatted_size: format_bytes(entry.size),
        size: entry.size,
        etag: entry.etag,
        last_modified: entry.last_modified,
        key: entry.key,
    }
}
