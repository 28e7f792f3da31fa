//! Path codec: canonical prefixes, folder names and breadcrumbs over a flat
//! key namespace, plus bucket naming rules.
//!
//! A canonical prefix is either empty (the bucket root) or a sequence of
//! non-empty segments each followed by exactly one delimiter, with no
//! leading delimiter.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    models::browser::Breadcrumb,
    services::store::MAX_OBJECT_KEY_LEN,
};

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathCodec {
    delimiter: char,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self { delimiter: '/' }
    }
}

impl PathCodec {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Reject control characters and anything longer than a store key.
    fn check_raw(&self, path: &str) -> ConsoleResult<()> {
        if path.len() > MAX_OBJECT_KEY_LEN {
            return Err(ConsoleError::invalid_path(
                path,
                format!("longer than {} bytes", MAX_OBJECT_KEY_LEN),
            ));
        }
        if path.chars().any(char::is_control) {
            return Err(ConsoleError::invalid_path(path, "contains control characters"));
        }
        Ok(())
    }

    fn segments<'a>(&self, path: &'a str) -> impl Iterator<Item = &'a str> {
        path.split(self.delimiter).filter(|s| !s.is_empty())
    }

    /// Canonical form of `prefix`: empty, or ending in exactly one delimiter
    /// with no leading or repeated delimiters.
    pub fn normalize(&self, prefix: &str) -> ConsoleResult<String> {
        self.check_raw(prefix)?;
        let mut canonical = String::with_capacity(prefix.len() + 1);
        for segment in self.segments(prefix) {
            canonical.push_str(segment);
            canonical.push(self.delimiter);
        }
        Ok(canonical)
    }

    /// Validate a single folder name. One trailing delimiter is tolerated and
    /// stripped; the returned name never contains the delimiter.
    pub fn folder_name<'a>(&self, name: &'a str) -> ConsoleResult<&'a str> {
        let trimmed = name.strip_suffix(self.delimiter).unwrap_or(name);
        if trimmed.is_empty() {
            return Err(ConsoleError::invalid_name(name, "folder name is required"));
        }
        if trimmed.contains(self.delimiter) {
            return Err(ConsoleError::invalid_name(
                name,
                format!("folder name cannot contain `{}`", self.delimiter),
            ));
        }
        if trimmed == "." || trimmed == ".." {
            return Err(ConsoleError::invalid_name(name, "reserved folder name"));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ConsoleError::invalid_name(name, "contains control characters"));
        }
        Ok(trimmed)
    }

    /// Prefix of the folder `name` directly under `parent`.
    pub fn child_prefix(&self, parent: &str, name: &str) -> ConsoleResult<String> {
        let mut prefix = self.normalize(parent)?;
        prefix.push_str(self.folder_name(name)?);
        prefix.push(self.delimiter);
        self.check_raw(&prefix)?;
        Ok(prefix)
    }

    /// One breadcrumb per path component, ordered root to leaf.
    pub fn breadcrumbs(&self, prefix: &str) -> ConsoleResult<Vec<Breadcrumb>> {
        self.check_raw(prefix)?;
        let mut cumulative = String::with_capacity(prefix.len() + 1);
        Ok(self
            .segments(prefix)
            .map(|segment| {
                cumulative.push_str(segment);
                cumulative.push(self.delimiter);
                Breadcrumb {
                    label: segment.to_string(),
                    prefix: cumulative.clone(),
                }
            })
            .collect())
    }

    /// Keys of uploaded files: no leading, trailing or repeated delimiters.
    pub fn object_key(&self, key: &str) -> ConsoleResult<()> {
        self.check_raw(key)?;
        if key.is_empty() {
            return Err(ConsoleError::invalid_path(key, "object key is required"));
        }
        if key.ends_with(self.delimiter) {
            return Err(ConsoleError::invalid_path(
                key,
                "object key cannot end with the delimiter; create a folder instead",
            ));
        }
        if key.split(self.delimiter).any(str::is_empty) {
            return Err(ConsoleError::invalid_path(
                key,
                "object key cannot start with or repeat the delimiter",
            ));
        }
        Ok(())
    }

    /// `key` relative to `prefix`.
    pub fn relative_name<'a>(&self, prefix: &str, key: &'a str) -> &'a str {
        key.strip_prefix(prefix).unwrap_or(key)
    }

    /// Last component of a key or prefix, trailing delimiter ignored.
    pub fn leaf<'a>(&self, path: &'a str) -> &'a str {
        let trimmed = path.strip_suffix(self.delimiter).unwrap_or(path);
        trimmed.rsplit(self.delimiter).next().unwrap_or(trimmed)
    }
}

/// Bucket names: 3–63 characters of lowercase letters, digits and hyphens,
/// starting and ending with a letter or digit.
pub fn validate_bucket_name(name: &str) -> ConsoleResult<()> {
    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(ConsoleError::invalid_name(
            name,
            "must be between 3 and 63 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err(ConsoleError::invalid_name(
            name,
            "allowed characters are lowercase letters, digits, and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(ConsoleError::invalid_name(
            name,
            "must start and end with a lowercase letter or digit",
        ));
    }
    Ok(())
}
