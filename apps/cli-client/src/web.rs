use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Path as UrlPath, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use client_sdk::{CallContext, DfsClient, DfsError, NoProgress};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub staging_dir: PathBuf,
    pub download_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Clone)]
struct WebState {
    client: DfsClient,
    config: Arc<GatewayConfig>,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    file_name: String,
}

pub async fn serve(bind_addr: SocketAddr, client: DfsClient, config: GatewayConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .with_context(|| format!("failed to create {}", config.staging_dir.display()))?;
    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .with_context(|| format!("failed to create {}", config.download_dir.display()))?;

    let app = build_router(client, config);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to listen on {bind_addr}"))?;
    info!(%bind_addr, "gateway listening");
    println!("web gateway at http://{bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(client: DfsClient, config: GatewayConfig) -> Router {
    let body_limit = config.max_upload_bytes;
    let state = WebState {
        client,
        config: Arc::new(config),
    };

    Router::new()
        .route("/upload", post(web_upload))
        .route("/download/{file_name}", get(web_download))
        .route("/files", get(web_files))
        .route(
            "/api/ping",
            get(|| async {
                Json(serde_json::json!({
                    "ok": true,
                    "service": "dfs-gateway"
                }))
            }),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

fn error_response(err: &DfsError) -> Response {
    let status = match err {
        DfsError::NotFound(_) => StatusCode::NOT_FOUND,
        DfsError::AlreadyExists(_) => StatusCode::CONFLICT,
        DfsError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        DfsError::Cancelled | DfsError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

/// Only a bare file name may reach the local staging and download directories.
fn local_path(dir: &Path, file_name: &str) -> Result<PathBuf, DfsError> {
    match Path::new(file_name).file_name() {
        Some(base) if base.to_str() == Some(file_name) => Ok(dir.join(base)),
        _ => Err(DfsError::InvalidArgument(format!(
            "{file_name} is not a plain file name"
        ))),
    }
}

/// Directory of its own under `base` for one gateway request, so concurrent
/// requests for the same file name never share a local file.
struct RequestDir {
    dir: PathBuf,
}

impl RequestDir {
    /// Returns the directory and the path of `file_name` inside it.
    async fn create(base: &Path, file_name: &str) -> Result<(Self, PathBuf), DfsError> {
        let dir = base.join(Uuid::new_v4().to_string());
        let path = local_path(&dir, file_name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok((Self { dir }, path))
    }

    async fn remove(self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!(path = %self.dir.display(), error = %err, "failed to remove request directory");
        }
    }
}

async fn web_upload(
    State(state): State<WebState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    let (request_dir, staged) =
        match RequestDir::create(&state.config.staging_dir, &query.file_name).await {
            Ok(created) => created,
            Err(err) => return error_response(&err),
        };

    let result = match tokio::fs::write(&staged, &body).await {
        Ok(()) => {
            state
                .client
                .upload_file(&staged, &CallContext::background(), Arc::new(NoProgress))
                .await
        }
        Err(err) => Err(DfsError::Io(err)),
    };
    request_dir.remove().await;

    match result {
        Ok(report) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "file_name": report.file_name,
                "size_bytes": report.file_size,
                "chunks": report.chunks.len(),
            })),
        )
            .into_response(),
        Err(err) => {
            warn!(file_name = %query.file_name, error = %err, "gateway upload failed");
            error_response(&err)
        }
    }
}

async fn web_download(
    State(state): State<WebState>,
    UrlPath(file_name): UrlPath<String>,
) -> Response {
    let (request_dir, target) =
        match RequestDir::create(&state.config.download_dir, &file_name).await {
            Ok(created) => created,
            Err(err) => return error_response(&err),
        };

    let result = match state
        .client
        .download_file(&file_name, &target, &CallContext::background(), Arc::new(NoProgress))
        .await
    {
        Ok(_) => tokio::fs::read(&target).await.map_err(DfsError::Io),
        Err(err) => Err(err),
    };
    request_dir.remove().await;

    match result {
        Ok(data) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{file_name}\""),
                ),
            ],
            data,
        )
            .into_response(),
        Err(err) => {
            warn!(%file_name, error = %err, "gateway download failed");
            error_response(&err)
        }
    }
}

async fn web_files(State(state): State<WebState>) -> Response {
    match state.client.list_files(&CallContext::background()).await {
        Ok(files) => Json(files).into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_paths_stay_inside_their_directory() {
        let dir = Path::new("uploads");
        assert_eq!(local_path(dir, "a.bin").unwrap(), dir.join("a.bin"));
        for bad in ["", "..", "../a.bin", "nested/a.bin"] {
            assert!(local_path(dir, bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn requests_for_the_same_name_get_separate_files() {
        let base = std::env::temp_dir().join(format!("dfs-gateway-{}", Uuid::new_v4()));

        let (first_dir, first) = RequestDir::create(&base, "a.bin").await.unwrap();
        let (second_dir, second) = RequestDir::create(&base, "a.bin").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(first.file_name(), second.file_name());

        tokio::fs::write(&first, b"first upload").await.unwrap();
        tokio::fs::write(&second, b"second").await.unwrap();
        assert_eq!(tokio::fs::read(&first).await.unwrap(), b"first upload");

        first_dir.remove().await;
        assert!(!first.exists());
        assert_eq!(tokio::fs::read(&second).await.unwrap(), b"second");

        second_dir.remove().await;
        let _ = tokio::fs::remove_dir_all(base).await;
    }

    #[tokio::test]
    async fn bad_names_create_no_request_directory() {
        let base = std::env::temp_dir().join(format!("dfs-gateway-{}", Uuid::new_v4()));
        assert!(RequestDir::create(&base, "../escape.bin").await.is_err());
        assert!(!base.exists());
    }

    #[test]
    fn sdk_errors_map_to_gateway_statuses() {
        let cases = [
            (DfsError::NotFound("f".into()), StatusCode::NOT_FOUND),
            (DfsError::AlreadyExists("f".into()), StatusCode::CONFLICT),
            (DfsError::InvalidArgument("f".into()), StatusCode::BAD_REQUEST),
            (DfsError::DeadlineExceeded, StatusCode::GATEWAY_TIMEOUT),
            (DfsError::Internal("disk".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(error_response(&err).status(), status);
        }
    }

    #[tokio::test]
    async fn ping_answers_without_a_cluster() {
        let client = DfsClient::new("http://127.0.0.1:1", Default::default()).unwrap();
        let app = build_router(
            client,
            GatewayConfig {
                staging_dir: std::env::temp_dir(),
                download_dir: std::env::temp_dir(),
                max_upload_bytes: 1024,
            },
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/api/ping"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
    }
}
