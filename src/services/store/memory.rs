//! MemoryStore: an object store held entirely in process memory.
//!
//! Keys are kept in `BTreeMap`s so listings come out in byte order, the same
//! as the SQLite backend. `page_limit` caps every listing page regardless of
//! the requested `max_keys`.

use super::{
    ByteStream, ListObjectsParams, ListPage, MAX_LIST_KEYS, ObjectStore, StoreError, StoreResult,
    body_from_bytes, collect_body, compute_common_prefix, ensure_key_safe,
};
use crate::models::{bucket::Bucket, object::ObjectEntry};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    sync::Arc,
};

struct StoredObject {
    entry: ObjectEntry,
    body: Bytes,
}

struct MemoryBucket {
    info: Bucket,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Clone)]
pub struct MemoryStore {
    buckets: Arc<RwLock<BTreeMap<String, MemoryBucket>>>,
    page_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_limit(MAX_LIST_KEYS)
    }

    /// A store that never returns more than `page_limit` keys per page.
    pub fn with_page_limit(page_limit: usize) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(BTreeMap::new())),
            page_limit: page_limit.clamp(1, MAX_LIST_KEYS),
        }
    }

    fn object_not_found(bucket: &str, key: &str) -> StoreError {
        StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_bucket(&self, name: &str, owner: &str) -> StoreResult<Bucket> {
        let mut buckets = self.buckets.write();
        if buckets.contains_key(name) {
            return Err(StoreError::BucketAlreadyExists(name.to_string()));
        }
        let info = Bucket {
            name: name.to_string(),
            owner: owner.to_string(),
            policy: None,
            created_at: Utc::now(),
        };
        buckets.insert(
            name.to_string(),
            MemoryBucket {
                info: info.clone(),
                objects: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    async fn head_bucket(&self, name: &str) -> StoreResult<Bucket> {
        self.buckets
            .read()
            .get(name)
            .map(|b| b.info.clone())
            .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))
    }

    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        Ok(self.buckets.read().values().map(|b| b.info.clone()).collect())
    }

    async fn delete_bucket(&self, name: &str, force: bool) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        let target = buckets
            .get(name)
            .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))?;
        if !force && !target.objects.is_empty() {
            return Err(StoreError::BucketNotEmpty(name.to_string()));
        }
        buckets.remove(name);
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        body: ByteStream,
    ) -> StoreResult<ObjectEntry> {
        ensure_key_safe(key)?;
        self.head_bucket(bucket).await?;
        let body = collect_body(body).await?;
        let entry = ObjectEntry {
            key: key.to_string(),
            size: body.len() as u64,
            content_type,
            etag: Some(format!("{:x}", md5::compute(&body))),
            last_modified: Utc::now(),
        };

        let mut buckets = self.buckets.write();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        target.objects.insert(
            key.to_string(),
            StoredObject {
                entry: entry.clone(),
                body,
            },
        );
        Ok(entry)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<(ObjectEntry, ByteStream)> {
        let buckets = self.buckets.read();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let stored = target
            .objects
            .get(key)
            .ok_or_else(|| Self::object_not_found(bucket, key))?;
        Ok((stored.entry.clone(), body_from_bytes(stored.body.clone())))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry> {
        let buckets = self.buckets.read();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        target
            .objects
            .get(key)
            .map(|stored| stored.entry.clone())
            .ok_or_else(|| Self::object_not_found(bucket, key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        target
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Self::object_not_found(bucket, key))
    }

    async fn list_objects(&self, bucket: &str, params: &ListObjectsParams) -> StoreResult<ListPage> {
        let max_keys = params.max_keys.clamp(1, self.page_limit);
        let buckets = self.buckets.read();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        let lower = match params.continuation_token.as_deref() {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Included(params.prefix.clone()),
        };

        let mut matched = target
            .objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(params.prefix.as_str()));

        let mut page = ListPage::default();
        let mut common_prefixes = BTreeSet::new();
        let mut last_key = None;
        for (key, stored) in matched.by_ref().take(max_keys) {
            last_key = Some(key.clone());
            if let Some(delim) = params.delimiter.as_deref() {
                if let Some(prefix) = compute_common_prefix(key, &params.prefix, delim) {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            page.objects.push(stored.entry.clone());
        }
        if matched.next().is_some() {
            page.next_continuation_token = last_key;
        }
        page.common_prefixes = common_prefixes.into_iter().collect();
        Ok(page)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_should_cap_pages_at_page_limit() {
        let store = MemoryStore::with_page_limit(2);
        store
            .create_bucket("b1", "admin")
            .await
            .unwrap_or_else(|e| panic!("create_bucket failed: {e}"));
        for key in ["a/1", "a/2", "b", "c"] {
            store
                .put_object("b1", key, None, body_from_bytes("x"))
                .await
                .unwrap_or_else(|e| panic!("put failed: {e}"));
        }

        let params = ListObjectsParams {
            delimiter: Some("/".into()),
            max_keys: 100,
            ..Default::default()
        };
        let first = store
            .list_objects("b1", &params)
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(first.common_prefixes, vec!["a/".to_string()]);
        assert!(first.objects.is_empty());
        assert_eq!(first.next_continuation_token.as_deref(), Some("a/2"));

        let second = store
            .list_objects(
                "b1",
                &ListObjectsParams {
                    continuation_token: first.next_continuation_token,
                    ..params
                },
            )
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert!(second.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn test_should_keep_non_empty_bucket_unless_forced() {
        let store = MemoryStore::new();
        store
            .create_bucket("b1", "admin")
            .await
            .unwrap_or_else(|e| panic!("create_bucket failed: {e}"));
        store
            .put_object("b1", "late.txt", None, body_from_bytes("x"))
            .await
            .unwrap_or_else(|e| panic!("put failed: {e}"));

        assert!(matches!(
            store.delete_bucket("b1", false).await,
            Err(StoreError::BucketNotEmpty(_))
        ));
        assert!(store.head_object("b1", "late.txt").await.is_ok());

        store
            .delete_bucket("b1", true)
            .await
            .unwrap_or_else(|e| panic!("forced delete failed: {e}"));
        assert!(matches!(
            store.delete_bucket("b1", true).await,
            Err(StoreError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_should_fail_listing_of_missing_bucket() {
        let store = MemoryStore::new();
        let result = store.list_objects("nope", &ListObjectsParams::default()).await;
        assert!(matches!(result, Err(StoreError::BucketNotFound(_))));
    }
}
