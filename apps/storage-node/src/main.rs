use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use bytes::Bytes;
use clap::Parser;
use common::{HealthStatus, NodeId, RpcErrorBody, STORAGE_SERVICE, StoreChunkResponse};
use tracing::{info, warn};

mod storage;

use storage::{ChunkStore, ChunkStoreError};

#[derive(Debug, Parser)]
#[command(name = "storage-node")]
#[command(about = "Storage node: persists and serves chunks by id")]
struct Args {
    #[arg(long, env = "DFS_STORAGE_BIND", default_value = "127.0.0.1:50052")]
    bind: SocketAddr,
    #[arg(long, env = "DFS_STORAGE_DIR", default_value = "./data/storage-node")]
    data_dir: PathBuf,
    /// Largest accepted chunk body, in megabytes.
    #[arg(long, env = "DFS_MAX_CHUNK_MB", default_value_t = 256)]
    max_chunk_mb: usize,
}

#[derive(Clone)]
struct ServerState {
    node_id: NodeId,
    store: Arc<ChunkStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    let store = ChunkStore::init(&args.data_dir)
        .await
        .with_context(|| format!("failed to open data dir {}", args.data_dir.display()))?;
    let existing_chunks = store
        .chunk_count()
        .await
        .context("failed to scan existing chunks")?;
    info!(
        data_dir = %store.root_dir().display(),
        existing_chunks,
        "chunk store ready"
    );

    let state = ServerState {
        node_id: NodeId::new_v4(),
        store: Arc::new(store),
    };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to listen on {}", args.bind))?;
    info!(bind_addr = %args.bind, "storage node listening");

    let body_limit = args.max_chunk_mb.saturating_mul(1024 * 1024);
    serve(listener, build_router(state, body_limit), shutdown_signal()).await?;

    info!("storage node stopped");
    Ok(())
}

/// Serves until `shutdown` resolves, then lets in-flight chunk writes finish.
async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down storage node");
}

fn build_router(state: ServerState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            &format!("/{STORAGE_SERVICE}/StoreChunk/{{chunk_id}}"),
            put(store_chunk),
        )
        .route(
            &format!("/{STORAGE_SERVICE}/RetrieveChunk/{{chunk_id}}"),
            get(retrieve_chunk),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

fn rpc_error(err: ChunkStoreError) -> Response {
    let code = err.code();
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(RpcErrorBody::new(code, err.to_string()))).into_response()
}

async fn health(State(state): State<ServerState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        node_id: state.node_id,
        role: "storage-node".to_string(),
        online: true,
    })
}

async fn store_chunk(
    State(state): State<ServerState>,
    Path(chunk_id): Path<String>,
    payload: Bytes,
) -> Response {
    match state.store.store_chunk(&chunk_id, &payload).await {
        Ok(()) => {
            info!(chunk_id = %chunk_id, size_bytes = payload.len(), "stored chunk");
            Json(StoreChunkResponse { success: true }).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, chunk_id = %chunk_id, "failed to store chunk");
            rpc_error(err)
        }
    }
}

async fn retrieve_chunk(
    State(state): State<ServerState>,
    Path(chunk_id): Path<String>,
) -> Response {
    match state.store.retrieve_chunk(&chunk_id).await {
        Ok(payload) => {
            info!(chunk_id = %chunk_id, size_bytes = payload.len(), "retrieved chunk");
            (StatusCode::OK, payload).into_response()
        }
        Err(err @ ChunkStoreError::NotFound(_)) => {
            warn!(chunk_id = %chunk_id, "chunk not found");
            rpc_error(err)
        }
        Err(err) => {
            tracing::error!(error = %err, chunk_id = %chunk_id, "failed to read chunk");
            rpc_error(err)
        }
    }
}
