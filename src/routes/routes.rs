//! Defines routes for the console's JSON API.
//!
//! ## Structure
//! - **Buckets**
//!   - `GET    /api/buckets`: list buckets with cached usage
//!   - `POST   /api/buckets`: create bucket
//!   - `DELETE /api/buckets/{bucket}?force=`: delete bucket
//!
//! - **Browser**
//!   - `GET    /api/buckets/{bucket}/browse?prefix=`: folders and files
//!   - `POST   /api/buckets/{bucket}/folders`: create folder
//!   - `DELETE /api/buckets/{bucket}/folders?prefix=`: recursive delete
//!   - `POST   /api/buckets/{bucket}/upload?prefix=`: multipart upload
//!   - `PUT | GET | DELETE /api/buckets/{bucket}/objects/{*key}`
//!   - `GET    /api/buckets/{bucket}/object-info?key=`
//!   - `GET    /api/buckets/{bucket}/zip?prefix=`: folder as a ZIP download
//!
//! - **Usage**
//!   - `GET    /api/buckets/{bucket}/stats`: cached figures, never scans
//!   - `POST   /api/buckets/{bucket}/stats/refresh`: recompute and wait
//!   - `GET    /api/dashboard/storage`: console-wide totals
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        browser_handlers::{
            browse, create_folder, delete_folder, delete_object, download_object, download_zip,
            object_info, upload_files, upload_object,
        },
        bucket_handlers::{
            create_bucket, delete_bucket, get_bucket_stats, list_buckets, refresh_bucket_stats,
            storage_summary,
        },
        health_handlers::{healthz, readyz},
    },
    services::console_service::ConsoleService,
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build the router. State (`ConsoleService`) is attached by the caller.
pub fn routes() -> Router<ConsoleService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Buckets
        .route("/api/buckets", get(list_buckets).post(create_bucket))
        .route("/api/buckets/{bucket}", delete(delete_bucket))
        // Browser
        .route("/api/buckets/{bucket}/browse", get(browse))
        .route(
            "/api/buckets/{bucket}/folders",
            post(create_folder).delete(delete_folder),
        )
        .route("/api/buckets/{bucket}/upload", post(upload_files))
        .route(
            "/api/buckets/{bucket}/objects/{*key}",
            put(upload_object).get(download_object).delete(delete_object),
        )
        .route("/api/buckets/{bucket}/object-info", get(object_info))
        .route("/api/buckets/{bucket}/zip", get(download_zip))
        // Usage
        .route("/api/buckets/{bucket}/stats", get(get_bucket_stats))
        .route(
            "/api/buckets/{bucket}/stats/refresh",
            post(refresh_bucket_stats),
        )
        .route("/api/dashboard/storage", get(storage_summary))
}
