use std::fmt;

use common::{ErrorCode, RpcErrorBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// Errors surfaced by the client orchestrator and its RPC clients.
#[derive(Debug, thiserror::Error)]
pub enum DfsError {
    /// Unknown file name or chunk id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The file name is already allocated.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A service failed while handling the request (storage I/O and the like).
    #[error("internal error: {0}")]
    Internal(String),

    /// Every dial attempt to a storage node failed.
    #[error("failed to connect to storage node at {address} after {attempts} attempts: {last_error}")]
    ConnectionFailure {
        address: String,
        attempts: u32,
        last_error: String,
    },

    /// One or more chunk transfers failed. Chunks that did succeed are left in place.
    #[error(
        "{operation} of {file_name} failed: {} of {total_chunks} chunks failed",
        .failed_chunks.len()
    )]
    PartialTransferFailure {
        operation: TransferKind,
        file_name: String,
        failed_chunks: Vec<u64>,
        total_chunks: usize,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with something that is not part of the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl DfsError {
    /// Whether repeating the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Internal(_) | Self::Transport(_) | Self::Io(_) | Self::Protocol(_)
        )
    }

    pub(crate) fn from_rpc(status: u16, body: Option<RpcErrorBody>) -> Self {
        match body {
            Some(body) => match body.code {
                ErrorCode::NotFound => Self::NotFound(body.message),
                ErrorCode::AlreadyExists => Self::AlreadyExists(body.message),
                ErrorCode::InvalidArgument => Self::InvalidArgument(body.message),
                ErrorCode::Internal => Self::Internal(body.message),
            },
            None => match status {
                404 => Self::NotFound(format!("http status {status}")),
                409 => Self::AlreadyExists(format!("http status {status}")),
                400 | 413 | 422 => Self::InvalidArgument(format!("http status {status}")),
                _ => Self::Internal(format!("http status {status}")),
            },
        }
    }
}
