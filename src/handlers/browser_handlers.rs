//! HTTP handlers for the object browser: folder navigation, uploads,
//! downloads and deletes.
//!
//! Object bodies are streamed in both directions; only the multipart form
//! buffers each file field before storing it, and folder archives are built
//! in memory.

use crate::{
    errors::AppError,
    models::{
        browser::{BrowseResult, ObjectInfo},
        object::ObjectEntry,
    },
    services::{
        console_service::ConsoleService,
        store::{ByteStream, body_from_bytes},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;

#[derive(Debug, Default, Deserialize)]
pub struct PrefixQuery {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

/// Body of `POST /api/buckets/{bucket}/folders`.
#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    #[serde(default)]
    pub prefix: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct FolderCreated {
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Serialize)]
pub struct FolderDeleted {
    pub bucket: String,
    pub prefix: String,
    pub deleted: u64,
}

/// `GET /api/buckets/{bucket}/browse?prefix=docs/`
pub async fn browse(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
    Query(q): Query<PrefixQuery>,
) -> Result<Json<BrowseResult>, AppError> {
    Ok(Json(service.browse(&bucket, &q.prefix).await?))
}

/// `POST /api/buckets/{bucket}/folders`
pub async fn create_folder(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
    Json(req): Json<CreateFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    let prefix = service.create_folder(&bucket, &req.prefix, &req.name).await?;
    Ok((StatusCode::CREATED, Json(FolderCreated { bucket, prefix })))
}

/// `DELETE /api/buckets/{bucket}/folders?prefix=docs/`: recursive.
pub async fn delete_folder(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
    Query(q): Query<PrefixQuery>,
) -> Result<Json<FolderDeleted>, AppError> {
    let deleted = service.delete_folder(&bucket, &q.prefix).await?;
    Ok(Json(FolderDeleted {
        bucket,
        prefix: q.prefix,
        deleted,
    }))
}

/// `POST /api/buckets/{bucket}/upload?prefix=docs/`
///
/// Every file field of the multipart form is stored at `prefix + filename`.
pub async fn upload_files(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
    Query(q): Query<PrefixQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {}", err)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("reading `{}` failed: {}", file_name, err)))?;
        let entry = service
            .upload_file(&bucket, &q.prefix, &file_name, content_type, body_from_bytes(data))
            .await?;
        stored.push(entry);
    }

    if stored.is_empty() {
        return Err(AppError::bad_request("no file field in upload form"));
    }
    Ok((StatusCode::CREATED, Json(stored)))
}

/// `PUT /api/buckets/{bucket}/objects/{*key}`: raw body upload.
pub async fn upload_object(
    State(service): State<ConsoleService>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream: ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other)),
    );
    let entry: ObjectEntry = service
        .upload_object(&bucket, &key, content_type, stream)
        .await?;

    let mut response = (StatusCode::OK, Json(&entry)).into_response();
    if let Some(etag) = entry.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}

/// `GET /api/buckets/{bucket}/objects/{*key}`: streamed as an attachment.
pub async fn download_object(
    State(service): State<ConsoleService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (info, body) = service.download_object(&bucket, &key).await?;
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &info);
    Ok(response)
}

/// `GET /api/buckets/{bucket}/zip?prefix=docs/`: every file under the
/// prefix as one ZIP attachment.
pub async fn download_zip(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
    Query(q): Query<PrefixQuery>,
) -> Result<Response, AppError> {
    let archive = service.download_folder_zip(&bucket, &q.prefix).await?;
    let mut response = Response::new(Body::from(archive.data));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_DISPOSITION, attachment(&archive.file_name));
    Ok(response)
}

/// `DELETE /api/buckets/{bucket}/objects/{*key}`
pub async fn delete_object(
    State(service): State<ConsoleService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    service.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/buckets/{bucket}/object-info?key=docs/readme.txt`
pub async fn object_info(
    State(service): State<ConsoleService>,
    Path(bucket): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<ObjectInfo>, AppError> {
    Ok(Json(service.object_info(&bucket, &q.key).await?))
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size));

    if let Some(etag) = info.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    let http_date = info.last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(value) = HeaderValue::from_str(&http_date) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    headers.insert(header::CONTENT_DISPOSITION, attachment(&info.name));
}

fn attachment(file_name: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name.replace('"', "")))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::test_support::{console, json_body},
        services::{
            hierarchy::HierarchyEngine,
            path_codec::PathCodec,
            retry::RetryPolicy,
            stats::{StatsAggregator, StatsPolicy},
            store::MemoryStore,
        },
    };
    use axum::{body::to_bytes, extract::FromRequest, http::Request};
    use std::sync::Arc;

    async fn console_with_bucket() -> ConsoleService {
        let service = console();
        service
            .create_bucket("bk1")
            .await
            .unwrap_or_else(|e| panic!("create_bucket failed: {e}"));
        service
    }

    fn object_path(key: &str) -> Path<(String, String)> {
        Path(("bk1".to_string(), key.to_string()))
    }

    #[tokio::test]
    async fn test_should_browse_folders_then_files() {
        let service = console_with_bucket().await;
        let response = create_folder(
            State(service.clone()),
            Path("bk1".into()),
            Json(CreateFolderReq {
                prefix: String::new(),
                name: "docs".into(),
            }),
        )
        .await
        .map(IntoResponse::into_response)
        .unwrap_or_else(|e| panic!("create_folder failed: {e}"));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["prefix"], "docs/");

        upload_object(
            State(service.clone()),
            object_path("docs/readme.txt"),
            HeaderMap::new(),
            Body::from(vec![b'a'; 68]),
        )
        .await
        .unwrap_or_else(|e| panic!("upload failed: {e}"));

        let Json(docs) = browse(
            State(service),
            Path("bk1".into()),
            Query(PrefixQuery {
                prefix: "docs".into(),
            }),
        )
        .await
        .unwrap_or_else(|e| panic!("browse failed: {e}"));
        assert_eq!(docs.prefix, "docs/");
        assert_eq!(docs.file_count, 1);
        assert_eq!(docs.files[0].name, "readme.txt");
        assert_eq!(docs.breadcrumbs[0].label, "docs");
    }

    #[tokio::test]
    async fn test_should_download_with_attachment_headers() {
        let service = console_with_bucket().await;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
        let uploaded = upload_object(
            State(service.clone()),
            object_path("reports/q1.csv"),
            headers,
            Body::from("a,b\n1,2\n"),
        )
        .await
        .unwrap_or_else(|e| panic!("upload failed: {e}"));
        assert!(uploaded.headers().contains_key(header::ETAG));

        let response = download_object(State(service), object_path("reports/q1.csv"))
            .await
            .unwrap_or_else(|e| panic!("download failed: {e}"));
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
        assert_eq!(headers[header::CONTENT_LENGTH], "8");
        let last_modified = headers[header::LAST_MODIFIED]
            .to_str()
            .unwrap_or_else(|e| panic!("non-ascii Last-Modified: {e}"));
        assert!(last_modified.ends_with(" GMT"), "got {last_modified}");
        assert!(
            chrono::NaiveDateTime::parse_from_str(last_modified, "%a, %d %b %Y %H:%M:%S GMT").is_ok(),
            "got {last_modified}"
        );
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"q1.csv\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_else(|e| panic!("reading body failed: {e}"));
        assert_eq!(&bytes[..], b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_should_store_multipart_files_under_prefix() {
        let service = console_with_bucket().await;
        let boundary = "XBOUNDARY";
        let form = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nhello\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(form))
            .unwrap_or_else(|e| panic!("building request failed: {e}"));
        let multipart = Multipart::from_request(request, &())
            .await
            .unwrap_or_else(|e| panic!("multipart extraction failed: {e}"));

        let response = upload_files(
            State(service.clone()),
            Path("bk1".into()),
            Query(PrefixQuery {
                prefix: "inbox/".into(),
            }),
            multipart,
        )
        .await
        .map(IntoResponse::into_response)
        .unwrap_or_else(|e| panic!("upload_files failed: {e}"));
        assert_eq!(response.status(), StatusCode::CREATED);

        let Json(info) = object_info(
            State(service),
            Path("bk1".into()),
            Query(KeyQuery {
                key: "inbox/notes.txt".into(),
            }),
        )
        .await
        .unwrap_or_else(|e| panic!("object_info failed: {e}"));
        assert_eq!(info.size, 5);
        assert_eq!(info.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_should_delete_objects_and_folders() {
        let service = console_with_bucket().await;
        for key in ["tmp/a", "tmp/b/c", "keep.txt"] {
            upload_object(
                State(service.clone()),
                object_path(key),
                HeaderMap::new(),
                Body::from("x"),
            )
            .await
            .unwrap_or_else(|e| panic!("upload failed: {e}"));
        }

        let status = delete_object(State(service.clone()), object_path("keep.txt"))
            .await
            .unwrap_or_else(|e| panic!("delete_object failed: {e}"));
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(deleted) = delete_folder(
            State(service.clone()),
            Path("bk1".into()),
            Query(PrefixQuery {
                prefix: "tmp/".into(),
            }),
        )
        .await
        .unwrap_or_else(|e| panic!("delete_folder failed: {e}"));
        assert_eq!(deleted.deleted, 2);

        let missing = delete_object(State(service), object_path("keep.txt")).await;
        assert!(matches!(missing, Err(ref e) if e.status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_should_name_attachment_with_custom_delimiter() {
        let hierarchy = HierarchyEngine::new(
            Arc::new(MemoryStore::new()),
            PathCodec::new(':'),
            RetryPolicy::default(),
            1000,
        );
        let service = ConsoleService::new(
            Arc::new(StatsAggregator::new(hierarchy, StatsPolicy::default())),
            false,
        );
        service
            .create_bucket("bk1")
            .await
            .unwrap_or_else(|e| panic!("create_bucket failed: {e}"));
        service
            .upload_object("bk1", "reports:2025/q1.csv", None, body_from_bytes("x"))
            .await
            .unwrap_or_else(|e| panic!("upload failed: {e}"));

        let response = download_object(State(service), object_path("reports:2025/q1.csv"))
            .await
            .unwrap_or_else(|e| panic!("download failed: {e}"));
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"2025/q1.csv\""
        );
    }

    #[tokio::test]
    async fn test_should_download_folder_as_zip() {
        let service = console_with_bucket().await;
        for key in ["docs/a.txt", "docs/sub/b.txt"] {
            upload_object(
                State(service.clone()),
                object_path(key),
                HeaderMap::new(),
                Body::from("content"),
            )
            .await
            .unwrap_or_else(|e| panic!("upload failed: {e}"));
        }

        let response = download_zip(
            State(service.clone()),
            Path("bk1".into()),
            Query(PrefixQuery {
                prefix: "docs/".into(),
            }),
        )
        .await
        .unwrap_or_else(|e| panic!("download_zip failed: {e}"));
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"docs.zip\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_else(|e| panic!("reading body failed: {e}"));
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec()))
            .unwrap_or_else(|e| panic!("open zip failed: {e}"));
        assert_eq!(archive.len(), 2);

        let missing = download_zip(
            State(service),
            Path("bk1".into()),
            Query(PrefixQuery {
                prefix: "nothing/".into(),
            }),
        )
        .await;
        assert!(matches!(missing, Err(ref e) if e.status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_should_reject_folder_key_uploads() {
        let service = console_with_bucket().await;
        let result = upload_object(
            State(service),
            object_path("docs/"),
            HeaderMap::new(),
            Body::empty(),
        )
        .await;
        assert!(matches!(result, Err(ref e) if e.status == StatusCode::BAD_REQUEST));
    }
}
