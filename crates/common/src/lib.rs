use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod chunking;

pub use chunking::{
    ChunkingError, DEFAULT_CHUNK_SIZE, TEMP_FILE_PREFIX, chunk_count, chunk_id, chunk_len,
    chunk_offset, is_valid_chunk_id, placement,
};

pub type NodeId = Uuid;

/// Route prefixes of the two RPC services.
pub const METADATA_SERVICE: &str = "MetadataService";
pub const STORAGE_SERVICE: &str = "StorageService";

/// Replica count reported by `ListFiles`. Nothing replicates chunks; the value is fixed.
pub const REPORTED_REPLICAS: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub node_id: NodeId,
    pub role: String,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkInfo {
    pub chunk_id: String,
    pub storage_node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocateChunksRequest {
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocateChunksResponse {
    pub chunks: Vec<ChunkInfo>,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetFileInfoRequest {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetFileInfoResponse {
    pub chunks: Vec<ChunkInfo>,
    pub file_size: u64,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ListFilesRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSummary {
    pub file_name: String,
    pub file_size: u64,
    pub num_chunks: u32,
    pub num_replicas: u32,
    pub upload_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListFilesResponse {
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreChunkResponse {
    pub success: bool,
}

/// Error class carried in the body of every failed RPC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Internal,
}

impl ErrorCode {
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::AlreadyExists => 409,
            Self::InvalidArgument => 400,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
