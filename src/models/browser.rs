//! View types produced by the hierarchy engine and the console API.
//!
//! None of these are stored: every value is derived per request from a
//! delimiter-aware listing.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A virtual folder: a common prefix shared by one or more keys.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FolderSummary {
    /// Segment between the browsed prefix and the next delimiter.
    pub name: String,

    /// Full prefix of the folder, ending in the delimiter.
    pub prefix: String,
}

/// A concrete object listed directly under the browsed prefix.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileSummary {
    pub key: String,
    /// Key relative to the browsed prefix.
    pub name: String,
    pub size: u64,
    pub formatted_size: String,
    pub last_modified: DateTime<Utc>,
    /// Stored content type, or one inferred from the key's extension.
    pub content_type: String,
    pub is_image: bool,
    pub is_text: bool,
    pub is_video: bool,
    pub is_archive: bool,
    pub is_previewable: bool,
}

/// One path component of the browsed prefix.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Breadcrumb {
    pub label: String,
    /// Cumulative prefix up to and including this component.
    pub prefix: String,
}

/// Immediate children of a prefix, folders and files each sorted by name.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub folders: Vec<FolderSummary>,
    pub files: Vec<FileSummary>,
}

/// Response of a browse request.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BrowseResult {
    pub bucket: String,
    pub prefix: String,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub folders: Vec<FolderSummary>,
    pub files: Vec<FileSummary>,
    pub folder_count: usize,
    pub file_count: usize,
}

/// Detailed metadata for a single object.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    /// Last component of the key under the configured delimiter.
    pub name: String,
    pub size: u64,
    pub formatted_size: String,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}
