//! Presentation helpers: human-readable sizes and content-type inference.

const UNIT: u64 = 1024;
const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

/// Objects above this size are never offered for inline preview.
const PREVIEW_LIMIT: u64 = 10 * 1024 * 1024;

/// Format a byte count, e.g. `68 B`, `1.5 KB`, `2.0 GB`.
///
/// Below 1024 the exact count is printed. Otherwise the value is divided by
/// 1024 while the quotient stays at or above 1024 and shown with one decimal.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < UNITS.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}", bytes as f64 / div as f64, UNITS[exp])
}

/// Extension of the key's final component. Text after the last dot only
/// counts when it is alphanumeric, so a dot in an earlier folder name never
/// yields an extension whatever the delimiter.
fn extension(key: &str) -> Option<String> {
    let (_, ext) = key.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Content type guessed from the key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    match extension(key).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("pdf") => "application/pdf",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Stored content type when present, otherwise one inferred from the key.
pub fn effective_content_type(key: &str, stored: Option<&str>) -> String {
    match stored {
        Some(ct) if !ct.is_empty() => ct.to_string(),
        _ => content_type_for_key(key).to_string(),
    }
}

/// Coarse classification of an object used by the browser view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileKind {
    pub image: bool,
    pub text: bool,
    pub video: bool,
    pub archive: bool,
    pub previewable: bool,
}

impl FileKind {
    pub fn classify(key: &str, content_type: &str, size: u64) -> Self {
        let image = content_type.starts_with("image/");
        let text = content_type.starts_with("text/")
            || matches!(
                content_type,
                "application/json" | "application/xml" | "application/javascript"
            );
        let video = content_type.starts_with("video/");
        let archive = matches!(
            content_type,
            "application/zip" | "application/x-tar" | "application/gzip"
        ) || matches!(
            extension(key).as_deref(),
            Some("zip" | "tar" | "gz" | "rar" | "7z")
        );
        Self {
            image,
            text,
            video,
            archive,
            previewable: size <= PREVIEW_LIMIT && (image || text || video),
        }
    }
}
