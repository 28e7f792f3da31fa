//! Object store client: the narrow interface the console needs from the
//! underlying storage (bucket CRUD, put/get/delete, list-by-prefix with an
//! optional delimiter).
//!
//! Backends:
//! - [`SqliteStore`]: SQLite metadata plus sharded payload files on disk.
//! - [`MemoryStore`]: everything in process memory (dev mode, tests).

use crate::models::{bucket::Bucket, object::ObjectEntry};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;

pub mod memory;
pub mod sqlite;
#[cfg(test)]
pub mod testing;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Longest key (in bytes) accepted by the store.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Upper bound on `max_keys` for a single listing page.
pub const MAX_LIST_KEYS: usize = 1000;

/// Streamed object payload.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    /// The backend cannot serve requests right now. Remote backends report
    /// dropped connections this way; `SqliteStore` uses it for a closed pool.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Failures worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Io(_) => true,
            Self::Sqlx(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parameters of one listing call.
#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: String,
    pub delimiter: Option<String>,
    /// Opaque token returned by the previous page.
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

/// One page of a listing.
///
/// With a delimiter, keys below the next delimiter are collapsed into
/// `common_prefixes`. A common prefix may be repeated on the following page
/// when its keys straddle the page boundary.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_bucket(&self, name: &str, owner: &str) -> StoreResult<Bucket>;

    async fn head_bucket(&self, name: &str) -> StoreResult<Bucket>;

    /// All buckets, ordered by name.
    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>>;

    /// Remove the bucket. With `force` every object in it goes too;
    /// otherwise the emptiness check and the removal happen atomically and
    /// a bucket holding any key fails with `BucketNotEmpty`.
    async fn delete_bucket(&self, name: &str, force: bool) -> StoreResult<()>;

    /// Store an object, overwriting any existing object with the same key.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        body: ByteStream,
    ) -> StoreResult<ObjectEntry>;

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<(ObjectEntry, ByteStream)>;

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// List keys starting with `params.prefix` in byte order.
    async fn list_objects(&self, bucket: &str, params: &ListObjectsParams)
    -> StoreResult<ListPage>;

    /// Cheap reachability probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Basic key validation shared by all backends.
///
/// Rejects empty or oversized keys, a leading `/`, `..` components and
/// control characters.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = || StoreError::InvalidObjectKey(key.to_string());
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(invalid());
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err(invalid());
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return Err(invalid());
    }
    Ok(())
}

/// Compute a synthetic "common prefix" for delimiter-aware listings.
///
/// Returns `Some(prefix)` if the key belongs to a grouped prefix, otherwise
/// `None`.
pub fn compute_common_prefix(key: &str, requested_prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::with_capacity(requested_prefix.len() + pos + delimiter.len());
    combined.push_str(requested_prefix);
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

/// Collect a payload stream into memory.
pub async fn collect_body(body: ByteStream) -> io::Result<Bytes> {
    use futures::TryStreamExt;

    let chunks: Vec<Bytes> = body.try_collect().await?;
    let mut buf = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

/// Wrap an in-memory payload as a [`ByteStream`].
pub fn body_from_bytes(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}
