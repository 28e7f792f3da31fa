//! SqliteStore: object store backed by SQLite for metadata and local disk
//! for object payloads.
//!
//! Payloads live beneath `base_path/{bucket}/{shard}/{shard}/{digest}` where
//! the digest is derived from the bucket and key, so keys of any shape
//! (including folder placeholders ending in `/`) map to plain files.

use super::{
    ByteStream, ListObjectsParams, ListPage, MAX_LIST_KEYS, ObjectStore, StoreError, StoreResult,
    ensure_key_safe,
};
use crate::models::{bucket::Bucket, object::ObjectEntry};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../../migrations/0001_init.sql");

#[derive(FromRow)]
struct BucketRow {
    name: String,
    owner: String,
    policy: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BucketRow> for Bucket {
    fn from(row: BucketRow) -> Self {
        Self {
            name: row.name,
            owner: row.owner,
            policy: row.policy,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ObjectRow {
    key: String,
    size_bytes: i64,
    content_type: Option<String>,
    etag: Option<String>,
    last_modified: DateTime<Utc>,
}

impl From<ObjectRow> for ObjectEntry {
    fn from(row: ObjectRow) -> Self {
        Self {
            key: row.key,
            size: u64::try_from(row.size_bytes).unwrap_or(0),
            content_type: row.content_type,
            etag: row.etag,
            last_modified: row.last_modified,
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl SqliteStore {
    /// Create a new store backed by the provided SQLite pool and using
    /// `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Digest of `bucket/key`, used for both the shard directories and the
    /// payload file name.
    fn object_digest(bucket_name: &str, key: &str) -> [u8; 16] {
        md5::compute(format!("{}/{}", bucket_name, key)).0
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let digest = Self::object_digest(bucket_name, key);
        let file_name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let mut path = self.bucket_root(bucket_name);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(file_name);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        sqlx::query_as::<_, BucketRow>(
            "SELECT name, owner, policy, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map(Bucket::from)
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT key, size_bytes, content_type, etag, last_modified
             FROM objects
             WHERE bucket_name = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map(ObjectEntry::from)
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn create_bucket(&self, name: &str, owner: &str) -> StoreResult<Bucket> {
        let bucket = Bucket {
            name: name.to_string(),
            owner: owner.to_string(),
            policy: None,
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (name, owner, policy, created_at) VALUES (?, ?, ?, ?)")
            .bind(&bucket.name)
            .bind(&bucket.owner)
            .bind(&bucket.policy)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::BucketAlreadyExists(name.to_string()));
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }

        fs::create_dir_all(self.bucket_root(name)).await?;
        Ok(bucket)
    }

    async fn head_bucket(&self, name: &str) -> StoreResult<Bucket> {
        self.fetch_bucket(name).await
    }

    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        let rows = sqlx::query_as::<_, BucketRow>(
            "SELECT name, owner, policy, created_at FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(Bucket::from).collect())
    }

    /// Removes metadata rows in one transaction, then the payload directory.
    /// A missing directory is not an error.
    async fn delete_bucket(&self, name: &str, force: bool) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        if !force {
            let occupied: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM objects WHERE bucket_name = ?)",
            )
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
            if occupied {
                return Err(StoreError::BucketNotEmpty(name.to_string()));
            }
        }
        sqlx::query("DELETE FROM objects WHERE bucket_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::BucketNotFound(name.to_string()));
        }
        tx.commit().await?;

        let bucket_path = self.bucket_root(name);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }
        Ok(())
    }

    /// Stream an object to a temporary file, then rename it into place and
    /// upsert the metadata row. Temp files are removed on every error path.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        mut body: ByteStream,
    ) -> StoreResult<ObjectEntry> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        let insert_result = sqlx::query_as::<_, ObjectRow>(
            r#"
            INSERT INTO objects (
                bucket_name, key, size_bytes, content_type, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_name, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                content_type = excluded.content_type,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING key, size_bytes, content_type, etag, last_modified
            "#,
        )
        .bind(&bucket_rec.name)
        .bind(key)
        .bind(size_bytes)
        .bind(content_type)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(row) => Ok(row.into()),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<(ObjectEntry, ByteStream)> {
        ensure_key_safe(key)?;
        self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(bucket, key).await?;

        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;

        Ok((object, Box::pin(ReaderStream::new(file))))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry> {
        ensure_key_safe(key)?;
        self.fetch_bucket(bucket).await?;
        self.fetch_object(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        self.fetch_bucket(bucket).await?;

        let result = sqlx::query("DELETE FROM objects WHERE bucket_name = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// Fetches `max_keys + 1` rows in key order to detect truncation; the
    /// continuation token is the base64 of the last key returned.
    async fn list_objects(&self, bucket: &str, params: &ListObjectsParams) -> StoreResult<ListPage> {
        self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT key, size_bytes, content_type, etag, last_modified \
             FROM objects WHERE bucket_name = ",
        );
        builder.push_bind(bucket);

        if !params.prefix.is_empty() {
            builder.push(" AND substr(key, 1, length(");
            builder.push_bind(&params.prefix);
            builder.push(")) = ");
            builder.push_bind(&params.prefix);
        }

        if let Some(token) = params.continuation_token.as_deref() {
            builder.push(" AND key > ");
            builder.push_bind(decode_continuation_token(token));
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_continuation_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_continuation_token = rows.last().map(|row| encode_continuation_token(&row.key));
        }

        let mut objects = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for row in rows {
            if let Some(delim) = params.delimiter.as_deref() {
                if let Some(prefix) = super::compute_common_prefix(&row.key, &params.prefix, delim)
                {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            objects.push(row.into());
        }

        Ok(ListPage {
            objects,
            common_prefixes: common_prefixes.into_iter().collect(),
            next_continuation_token,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.db.is_closed() {
            return Err(StoreError::Unavailable("connection pool is closed".into()));
        }
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
