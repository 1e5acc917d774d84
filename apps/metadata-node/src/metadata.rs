use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{
    ChunkInfo, ChunkingError, ErrorCode, FileSummary, REPORTED_REPLICAS, chunk_count, chunk_id,
    is_valid_chunk_id, placement,
};

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("File {0} already exists")]
    AlreadyExists(String),
    #[error("File {0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
}

impl MetadataError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
        }
    }
}

impl From<ChunkingError> for MetadataError {
    fn from(err: ChunkingError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file_name: String,
    pub file_size: u64,
    pub chunks: Vec<ChunkInfo>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            num_chunks: self.chunks.len() as u32,
            num_replicas: REPORTED_REPLICAS,
            upload_date: self.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// In-memory file table plus the static storage node registry.
///
/// Records live only as long as the process; a restart forgets every file while
/// the chunk bytes stay on the storage nodes.
pub struct MetadataService {
    registry: Vec<String>,
    chunk_size: u64,
    files: BTreeMap<String, FileRecord>,
}

impl MetadataService {
    pub fn new(registry: Vec<String>, chunk_size: u64) -> Result<Self, MetadataError> {
        if registry.is_empty() {
            return Err(ChunkingError::EmptyRegistry.into());
        }

        Ok(Self {
            registry,
            chunk_size,
            files: BTreeMap::new(),
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn registry(&self) -> &[String] {
        &self.registry
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Decides placement for every chunk of a new file and records it.
    ///
    /// Storage nodes are not contacted: a successful allocation says nothing
    /// about whether any chunk has been written.
    pub fn allocate_chunks(
        &mut self,
        file_name: &str,
        file_size: u64,
    ) -> Result<Vec<ChunkInfo>, MetadataError> {
        if self.files.contains_key(file_name) {
            return Err(MetadataError::AlreadyExists(file_name.to_string()));
        }
        if file_name.is_empty() {
            return Err(MetadataError::InvalidArgument(
                "file name must not be empty".to_string(),
            ));
        }
        // Ids differ only in their numeric suffix, so chunk 0 speaks for all.
        if !is_valid_chunk_id(&chunk_id(file_name, 0)) {
            return Err(MetadataError::InvalidArgument(format!(
                "file name {file_name:?} cannot be stored as chunks"
            )));
        }

        let num_chunks = chunk_count(file_size, self.chunk_size)?;

        let chunks = (0..num_chunks)
            .map(|index| -> Result<ChunkInfo, ChunkingError> {
                Ok(ChunkInfo {
                    chunk_id: chunk_id(file_name, index),
                    storage_node: placement(index, &self.registry)?.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.files.insert(
            file_name.to_string(),
            FileRecord {
                file_name: file_name.to_string(),
                file_size,
                chunks: chunks.clone(),
                created_at: Utc::now(),
            },
        );

        Ok(chunks)
    }

    pub fn get_file_info(&self, file_name: &str) -> Result<&FileRecord, MetadataError> {
        self.files
            .get(file_name)
            .ok_or_else(|| MetadataError::NotFound(file_name.to_string()))
    }

    pub fn list_files(&self) -> Vec<FileSummary> {
        self.files.values().map(FileRecord::summary).collect()
    }
}
