//! Represents a logical bucket, the top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A storage bucket as reported by the object store.
///
/// Buckets are flat namespaces: any hierarchy inside them is derived from
/// key delimiters at read time and never stored here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Unique bucket name (lowercase letters, digits and hyphens, 3–63 chars).
    pub name: String,

    /// Account that created the bucket.
    pub owner: String,

    /// Optional reference to an access policy attached to the bucket.
    pub policy: Option<String>,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
