//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of a single object within a bucket.
///
/// The struct carries metadata only; payload bytes are streamed separately
/// by the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full object key (flat, delimiter characters carry no meaning here).
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Content type recorded at upload time, if any.
    pub content_type: Option<String>,

    /// MD5 hex digest of the payload.
    pub etag: Option<String>,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,
}
