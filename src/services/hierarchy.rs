//! Hierarchy engine: projects a flat key namespace into folders and files.
//!
//! Folders are never stored. They are common prefixes collapsed by the
//! store's delimiter-aware listing, plus zero-byte placeholder objects whose
//! key is the folder prefix itself. Listings are stateless; pages of one
//! listing are fetched strictly in sequence, each with bounded retries.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    models::{
        browser::{FileSummary, FolderSummary, Listing},
        object::ObjectEntry,
    },
    services::{
        format::{FileKind, effective_content_type, format_bytes},
        path_codec::PathCodec,
        retry::{Retried, RetryPolicy},
        store::{ListObjectsParams, ListPage, ObjectStore, StoreError, body_from_bytes},
    },
};
use bytes::Bytes;
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a recursive delete. `failure` is set when the store refused a
/// delete part way through; `deleted` keys are gone either way.
#[derive(Debug, Default)]
pub struct PrefixDeletion {
    pub deleted: u64,
    pub failure: Option<ConsoleError>,
}

/// Totals of one flat walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub pages: usize,
    pub objects: u64,
}

#[derive(Clone)]
pub struct HierarchyEngine {
    store: Arc<dyn ObjectStore>,
    codec: PathCodec,
    retry: RetryPolicy,
    page_size: usize,
}

impl HierarchyEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: PathCodec,
        retry: RetryPolicy,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            codec,
            retry,
            page_size: page_size.max(1),
        }
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    async fn fetch_page(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
        cancel: &CancellationToken,
    ) -> ConsoleResult<ListPage> {
        let outcome = self
            .retry
            .run("list_objects", cancel, || self.store.list_objects(bucket, params))
            .await;
        match outcome {
            Retried::Done(result) => result.map_err(ConsoleError::from),
            Retried::Cancelled => Err(ConsoleError::ScanAborted {
                bucket: bucket.to_string(),
                reason: "cancelled".into(),
            }),
        }
    }

    /// Follow continuation tokens until the listing is exhausted, handing
    /// every page to `on_page`. Any page failure aborts the whole listing.
    async fn for_each_page<F>(
        &self,
        bucket: &str,
        mut params: ListObjectsParams,
        cancel: &CancellationToken,
        mut on_page: F,
    ) -> ConsoleResult<usize>
    where
        F: FnMut(ListPage),
    {
        let mut pages = 0;
        loop {
            let mut page = self.fetch_page(bucket, &params, cancel).await?;
            pages += 1;
            let next = page.next_continuation_token.take();
            on_page(page);
            match next {
                Some(token) if params.continuation_token.as_deref() == Some(token.as_str()) => {
                    return Err(ConsoleError::Store(format!(
                        "listing of bucket `{}` did not advance past token `{}`",
                        bucket, token
                    )));
                }
                Some(token) => params.continuation_token = Some(token),
                None => return Ok(pages),
            }
        }
    }

    /// Immediate children of `prefix`: folders and files, each sorted by name
    /// in byte order and listed exactly once. An empty result is not an error.
    pub async fn list(&self, bucket: &str, prefix: &str) -> ConsoleResult<Listing> {
        let prefix = self.codec.normalize(prefix)?;
        let delimiter = self.codec.delimiter();
        let params = ListObjectsParams {
            prefix: prefix.clone(),
            delimiter: Some(delimiter.to_string()),
            continuation_token: None,
            max_keys: self.page_size,
        };

        let mut folders: BTreeMap<String, FolderSummary> = BTreeMap::new();
        let mut files: BTreeMap<String, FileSummary> = BTreeMap::new();
        let pages = self
            .for_each_page(bucket, params, &CancellationToken::new(), |page| {
                for common in page.common_prefixes {
                    let rest = self.codec.relative_name(&prefix, &common);
                    let name = rest.strip_suffix(delimiter).unwrap_or(rest);
                    if name.is_empty() || folders.contains_key(name) {
                        continue;
                    }
                    folders.insert(
                        name.to_string(),
                        FolderSummary {
                            name: name.to_string(),
                            prefix: common.clone(),
                        },
                    );
                }
                for entry in page.objects {
                    // The browsed folder's own placeholder.
                    if entry.key == prefix {
                        continue;
                    }
                    let summary = file_summary(&self.codec, &prefix, entry);
                    files.insert(summary.name.clone(), summary);
                }
            })
            .await?;

        debug!(
            bucket = %bucket,
            prefix = %prefix,
            pages,
            folders = folders.len(),
            files = files.len(),
            "listing composed"
        );

        Ok(Listing {
            folders: folders.into_values().collect(),
            files: files.into_values().collect(),
        })
    }

    /// Visit every object under `prefix` without delimiter collapsing.
    pub async fn walk<F>(
        &self,
        bucket: &str,
        prefix: &str,
        cancel: &CancellationToken,
        mut visit: F,
    ) -> ConsoleResult<WalkSummary>
    where
        F: FnMut(&ObjectEntry),
    {
        let params = ListObjectsParams {
            prefix: self.codec.normalize(prefix)?,
            delimiter: None,
            continuation_token: None,
            max_keys: self.page_size,
        };
        let mut objects = 0;
        let pages = self
            .for_each_page(bucket, params, cancel, |page| {
                for entry in &page.objects {
                    objects += 1;
                    visit(entry);
                }
            })
            .await?;
        Ok(WalkSummary { pages, objects })
    }

    /// Make a folder visible before it has content by writing a zero-byte
    /// placeholder at its full prefix. Returns that prefix.
    pub async fn create_folder(&self, bucket: &str, parent: &str, name: &str) -> ConsoleResult<String> {
        let prefix = self.codec.child_prefix(parent, name)?;
        self.store
            .put_object(bucket, &prefix, None, body_from_bytes(Bytes::new()))
            .await?;
        debug!(bucket = %bucket, prefix = %prefix, "folder placeholder written");
        Ok(prefix)
    }

    /// Delete every key under a non-root prefix, placeholder included.
    /// Keys that vanish concurrently are skipped. Errors before the first
    /// delete are returned as `Err`; a store failure after that stops the
    /// loop and is reported alongside the partial count.
    pub async fn delete_prefix(&self, bucket: &str, prefix: &str) -> ConsoleResult<PrefixDeletion> {
        let prefix = self.codec.normalize(prefix)?;
        if prefix.is_empty() {
            return Err(ConsoleError::invalid_path(
                &prefix,
                "refusing to delete the bucket root; delete the bucket instead",
            ));
        }

        let mut keys = Vec::new();
        self.walk(bucket, &prefix, &CancellationToken::new(), |entry| {
            keys.push(entry.key.clone())
        })
        .await?;

        let mut outcome = PrefixDeletion::default();
        for key in keys {
            match self.store.delete_object(bucket, &key).await {
                Ok(()) => outcome.deleted += 1,
                Err(StoreError::ObjectNotFound { .. }) => {
                    debug!(bucket = %bucket, key = %key, "object already gone");
                }
                Err(err) => {
                    outcome.failure = Some(err.into());
                    break;
                }
            }
        }
        Ok(outcome)
    }
}

fn file_summary(codec: &PathCodec, prefix: &str, entry: ObjectEntry) -> FileSummary {
    let content_type = effective_content_type(&entry.key, entry.content_type.as_deref());
    let kind = FileKind::classify(&entry.key, &content_type, entry.size);
    FileSummary {
        name: codec.relative_name(prefix, &entry.key).to_string(),
        formatted_size: format_bytes(entry.size),
        size: entry.size,
        last_modified: entry.last_modified,
        content_type,
        is_image: kind.image,
        is_text: kind.text,
        is_video: kind.video,
        is_archive: kind.archive,
        is_previewable: kind.previewable,
        key: entry.key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::{MemoryStore, testing::InstrumentedStore};
    use std::time::Duration;

    const FAST_RETRY: RetryPolicy = RetryPolicy {
        attempts: 3,
        base_backoff: Duration::from_millis(1),
    };

    async fn seeded(page_limit: usize, keys: &[&str]) -> Arc<InstrumentedStore> {
        let store = Arc::new(InstrumentedStore::new(MemoryStore::with_page_limit(page_limit)));
        store
            .create_bucket("b1", "admin")
            .await
            .unwrap_or_else(|e| panic!("create_bucket failed: {e}"));
        for key in keys {
            store
                .put_object("b1", key, None, body_from_bytes(Bytes::from_static(b"data")))
                .await
                .unwrap_or_else(|e| panic!("put {key} failed: {e}"));
        }
        store
    }

    fn engine(store: Arc<InstrumentedStore>) -> HierarchyEngine {
        HierarchyEngine::new(store, PathCodec::default(), FAST_RETRY, 1000)
    }

    fn names(listing: &Listing) -> (Vec<&str>, Vec<&str>) {
        (
            listing.folders.iter().map(|f| f.name.as_str()).collect(),
            listing.files.iter().map(|f| f.name.as_str()).collect(),
        )
    }

    #[tokio::test]
    async fn test_should_list_immediate_children_sorted() {
        let store = seeded(1000, &["b.txt", "a/1", "A.txt", "z/", "a/2/deep", "c.txt"]).await;
        let listing = engine(store)
            .list("b1", "")
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let (folders, files) = names(&listing);
        assert_eq!(folders, vec!["a", "z"]);
        assert_eq!(files, vec!["A.txt", "b.txt", "c.txt"]);
        assert_eq!(listing.folders[0].prefix, "a/");
    }

    #[tokio::test]
    async fn test_should_compose_many_pages_without_duplicates() {
        let keys = [
            "docs/a/1", "docs/a/2", "docs/a/3", "docs/b/1", "docs/f1", "docs/f2", "docs/f3",
            "docs/g/1", "docs/g/2",
        ];
        let store = seeded(2, &keys).await;
        let listing = engine(store.clone())
            .list("b1", "docs")
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let (folders, files) = names(&listing);
        assert_eq!(folders, vec!["a", "b", "g"]);
        assert_eq!(files, vec!["f1", "f2", "f3"]);
        assert!(store.list_calls() >= 5);
    }

    #[tokio::test]
    async fn test_should_be_idempotent_without_mutation() {
        let store = seeded(3, &["x/1", "y", "x/2", "w/"]).await;
        let engine = engine(store);
        let first = engine.list("b1", "").await.unwrap_or_else(|e| panic!("{e}"));
        let second = engine.list("b1", "").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_should_treat_missing_prefix_as_empty() {
        let store = seeded(1000, &["docs/readme.txt"]).await;
        let listing = engine(store)
            .list("b1", "nothing/here/")
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(listing, Listing::default());
    }

    #[tokio::test]
    async fn test_should_hide_own_placeholder_but_keep_folder_visible() {
        let store = seeded(1000, &["docs/"]).await;
        let engine = engine(store.clone());
        let root = engine.list("b1", "").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(names(&root), (vec!["docs"], vec![]));
        let inside = engine.list("b1", "docs/").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(inside, Listing::default());
    }

    #[tokio::test]
    async fn test_should_retry_transient_listing_failures() {
        let store = seeded(1000, &["a.txt"]).await;
        store.fail_next_lists(2);
        let listing = engine(store.clone())
            .list("b1", "")
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(listing.files.len(), 1);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_should_abort_whole_listing_when_a_page_keeps_failing() {
        let store = seeded(1, &["a", "b", "c"]).await;
        store.fail_lists_from_call(1);
        let result = engine(store).list("b1", "").await;
        assert!(matches!(result, Err(ConsoleError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_should_report_missing_bucket() {
        let store = seeded(1000, &[]).await;
        let result = engine(store).list("nope", "").await;
        assert_eq!(result, Err(ConsoleError::BucketNotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_should_walk_every_key_under_prefix() {
        let store = seeded(2, &["a/1", "a/2/3", "b", "a/"]).await;
        let mut seen = Vec::new();
        let summary = engine(store)
            .walk("b1", "a/", &CancellationToken::new(), |e| seen.push(e.key.clone()))
            .await
            .unwrap_or_else(|e| panic!("walk failed: {e}"));
        assert_eq!(seen, vec!["a/", "a/1", "a/2/3"]);
        assert_eq!(summary.objects, 3);
        assert_eq!(summary.pages, 2);
    }

    #[tokio::test]
    async fn test_should_create_and_delete_folders() {
        let store = seeded(2, &["docs/a", "docs/sub/b", "other"]).await;
        let engine = engine(store.clone());

        let prefix = engine
            .create_folder("b1", "docs", "new")
            .await
            .unwrap_or_else(|e| panic!("create_folder failed: {e}"));
        assert_eq!(prefix, "docs/new/");
        let docs = engine.list("b1", "docs/").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(names(&docs), (vec!["new", "sub"], vec!["a"]));

        let outcome = engine
            .delete_prefix("b1", "docs/")
            .await
            .unwrap_or_else(|e| panic!("delete_prefix failed: {e}"));
        assert_eq!(outcome.deleted, 3);
        assert!(outcome.failure.is_none());
        let root = engine.list("b1", "").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(names(&root), (vec![], vec!["other"]));
    }

    #[tokio::test]
    async fn test_should_report_partial_count_when_a_delete_fails() {
        let store = seeded(1000, &["docs/a", "docs/b", "docs/c"]).await;
        store.fail_deletes_after(1);
        let outcome = engine(store.clone())
            .delete_prefix("b1", "docs/")
            .await
            .unwrap_or_else(|e| panic!("delete_prefix failed: {e}"));
        assert_eq!(outcome.deleted, 1);
        assert!(matches!(outcome.failure, Some(ConsoleError::StoreUnavailable(_))));
        assert!(store.inner.head_object("b1", "docs/b").await.is_ok());
    }

    #[tokio::test]
    async fn test_should_refuse_to_delete_root_prefix() {
        let store = seeded(1000, &["a"]).await;
        let result = engine(store).delete_prefix("b1", "/").await;
        assert!(matches!(result, Err(ConsoleError::InvalidPath { .. })));
    }
}
