//! HTTP handlers for bucket management and usage figures.

use crate::{
    errors::AppError,
    models::stats::{BucketStatsView, BucketSummary, StorageSummary},
    services::console_service::ConsoleService,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

/// Body of `POST /api/buckets`.
#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteBucketQuery {
    #[serde(default)]
    pub force: bool,
}

/// `GET /api/buckets`
pub async fn list_buckets(
    State(service): State<ConsoleService>,
) -> Result<Json<Vec<BucketSummary>>, AppError> {
    Ok(Json(service.list_buckets().await?))
}

/// `POST /api/buckets`
pub async fn create_bucket(
    State(service): State<ConsoleService>,
    Json(req): Json<CreateBucketReq>,
) -> Result<impl IntoResponse, AppError> {
    let bucket = service.create_bucket(&req.name).await?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

/// `DELETE /api/buckets/{bucket}?force=true`
pub async fn delete_bucket(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
    Query(q): Query<DeleteBucketQuery>,
) -> Result<StatusCode, AppError> {
    service.delete_bucket(&bucket, q.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/buckets/{bucket}/stats`: cached figures only.
pub async fn get_bucket_stats(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
) -> Result<Json<BucketStatsView>, AppError> {
    Ok(Json(service.get_bucket_stats(&bucket).await?))
}

/// `POST /api/buckets/{bucket}/stats/refresh`: waits for the scan.
pub async fn refresh_bucket_stats(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
) -> Result<Json<BucketStatsView>, AppError> {
    Ok(Json(service.refresh_bucket_stats(&bucket).await?))
}

/// `GET /api/dashboard/storage`
pub async fn storage_summary(
    State(service): State<ConsoleService>,
) -> Result<Json<StorageSummary>, AppError> {
    Ok(Json(service.storage_summary().await?))
}
