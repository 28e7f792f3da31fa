use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::services::store::StoreError;

/// Errors surfaced by the console's engines and API layer.
///
/// Carries owned strings only so one failed scan can be handed to every
/// caller that joined it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid name `{name}`: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("bucket `{0}` already exists")]
    AlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    NotEmpty(String),
    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("stats scan of bucket `{bucket}` aborted: {reason}")]
    ScanAborted { bucket: String, reason: String },
    #[error("object store error: {0}")]
    Store(String),
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

impl ConsoleError {
    pub fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Transient conditions a caller may retry without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::ScanAborted { .. })
    }

    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "InvalidPath",
            Self::InvalidName { .. } => "InvalidName",
            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::NotEmpty(_) => "NotEmpty",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::ScanAborted { .. } => "ScanAborted",
            Self::Store(_) => "StoreError",
        }
    }
}

impl From<StoreError> for ConsoleError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            return Self::StoreUnavailable(err.to_string());
        }
        match err {
            StoreError::BucketNotFound(name) => Self::BucketNotFound(name),
            StoreError::BucketAlreadyExists(name) => Self::AlreadyExists(name),
            StoreError::BucketNotEmpty(name) => Self::NotEmpty(name),
            StoreError::ObjectNotFound { bucket, key } => Self::ObjectNotFound { bucket, key },
            StoreError::InvalidObjectKey(key) => Self::invalid_path(&key, "rejected by object store"),
            other => Self::Store(other.to_string()),
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// The same request may succeed later without changes.
    pub retryable: bool,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            code: "Error",
            message: msg.into(),
            retryable: false,
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: "BadRequest",
            ..Self::new(StatusCode::BAD_REQUEST, msg)
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16(),
            "retryable": self.retryable
        }));

        (self.status, body).into_response()
    }
}

impl From<ConsoleError> for AppError {
    fn from(err: ConsoleError) -> Self {
        let status = match &err {
            ConsoleError::InvalidPath { .. } | ConsoleError::InvalidName { .. } => {
                StatusCode::BAD_REQUEST
            }
            ConsoleError::BucketNotFound(_) | ConsoleError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ConsoleError::AlreadyExists(_) | ConsoleError::NotEmpty(_) => StatusCode::CONFLICT,
            ConsoleError::StoreUnavailable(_) | ConsoleError::ScanAborted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ConsoleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
