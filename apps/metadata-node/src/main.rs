use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use common::{
    AllocateChunksRequest, AllocateChunksResponse, GetFileInfoRequest, GetFileInfoResponse,
    HealthStatus, ListFilesRequest, ListFilesResponse, METADATA_SERVICE, NodeId, RpcErrorBody,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

mod metadata;

use metadata::{MetadataError, MetadataService};

#[derive(Debug, Parser)]
#[command(name = "metadata-node")]
#[command(about = "Metadata service: allocates file chunks across storage nodes")]
struct Args {
    #[arg(long, env = "DFS_METADATA_BIND", default_value = "127.0.0.1:50051")]
    bind: SocketAddr,
    /// Comma-separated storage node base URLs, in placement order.
    #[arg(
        long,
        env = "DFS_STORAGE_NODES",
        default_value = "http://127.0.0.1:50052,http://127.0.0.1:50053"
    )]
    storage_nodes: String,
    #[arg(long, env = "DFS_CHUNK_SIZE_MB", default_value_t = 64)]
    chunk_size_mb: u64,
}

#[derive(Clone)]
struct ServerState {
    node_id: NodeId,
    metadata: Arc<Mutex<MetadataService>>,
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
    let registry = parse_storage_nodes(&args.storage_nodes);
    let chunk_size = args.chunk_size_mb.saturating_mul(1024 * 1024);

    let service = MetadataService::new(registry, chunk_size)
        .context("invalid metadata service configuration")?;
    info!(
        storage_nodes = ?service.registry(),
        chunk_size,
        "metadata registry configured"
    );

    let state = ServerState {
        node_id: NodeId::new_v4(),
        metadata: Arc::new(Mutex::new(service)),
    };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to listen on {}", args.bind))?;
    info!(bind_addr = %args.bind, "metadata node listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("metadata node stopped");
    Ok(())
}

fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            &format!("/{METADATA_SERVICE}/AllocateChunks"),
            post(allocate_chunks),
        )
        .route(&format!("/{METADATA_SERVICE}/GetFileInfo"), post(get_file_info))
        .route(&format!("/{METADATA_SERVICE}/ListFiles"), post(list_files))
        .with_state(state)
}

fn parse_storage_nodes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .map(|node| node.trim_end_matches('/').to_string())
        .collect()
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

    info!("shutting down metadata node");
}

fn rpc_error(err: MetadataError) -> Response {
    let code = err.code();
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(RpcErrorBody::new(code, err.to_string()))).into_response()
}

async fn health(State(state): State<ServerState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        node_id: state.node_id,
        role: "metadata-node".to_string(),
        online: true,
    })
}

async fn allocate_chunks(
    State(state): State<ServerState>,
    Json(request): Json<AllocateChunksRequest>,
) -> Response {
    let mut metadata = state.metadata.lock().await;
    match metadata.allocate_chunks(&request.file_name, request.file_size) {
        Ok(chunks) => {
            info!(
                file_name = %request.file_name,
                file_size = request.file_size,
                num_chunks = chunks.len(),
                "allocated chunks"
            );
            Json(AllocateChunksResponse {
                chunks,
                chunk_size: metadata.chunk_size(),
            })
            .into_response()
        }
        Err(err) => {
            warn!(error = %err, file_name = %request.file_name, "chunk allocation rejected");
            rpc_error(err)
        }
    }
}

async fn get_file_info(
    State(state): State<ServerState>,
    Json(request): Json<GetFileInfoRequest>,
) -> Response {
    let metadata = state.metadata.lock().await;
    match metadata.get_file_info(&request.file_name) {
        Ok(record) => Json(GetFileInfoResponse {
            chunks: record.chunks.clone(),
            file_size: record.file_size,
            chunk_size: metadata.chunk_size(),
        })
        .into_response(),
        Err(err) => rpc_error(err),
    }
}

async fn list_files(
    State(state): State<ServerState>,
    Json(_request): Json<ListFilesRequest>,
) -> Json<ListFilesResponse> {
    let files = state.metadata.lock().await.list_files();
    Json(ListFilesResponse { files })
}
