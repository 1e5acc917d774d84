use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use common::{ErrorCode, TEMP_FILE_PREFIX, is_valid_chunk_id};
use tokio::fs;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum ChunkStoreError {
    #[error("Chunk {0} not found")]
    NotFound(String),
    #[error("invalid chunk id: {0:?}")]
    InvalidChunkId(String),
    #[error("{context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChunkStoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidChunkId(_) => ErrorCode::InvalidArgument,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    fn internal(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Internal {
            context: context.into(),
            source,
        }
    }
}

/// Flat directory of chunk files named by chunk id.
///
/// Nothing is ever deleted. Two writers racing on the same id both succeed and
/// the last rename wins.
pub struct ChunkStore {
    root_dir: PathBuf,
    chunks_dir: PathBuf,
}

impl ChunkStore {
    pub async fn init(root_dir: impl Into<PathBuf>) -> Result<Self, ChunkStoreError> {
        let root_dir = root_dir.into();
        let chunks_dir = root_dir.join("chunks");

        fs::create_dir_all(&chunks_dir).await.map_err(|err| {
            ChunkStoreError::internal(
                format!("failed to create storage directory {}", chunks_dir.display()),
                err,
            )
        })?;

        Ok(Self {
            root_dir,
            chunks_dir,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub async fn store_chunk(&self, chunk_id: &str, data: &[u8]) -> Result<(), ChunkStoreError> {
        let path = self.chunk_path(chunk_id)?;
        write_atomic(&path, data)
            .await
            .map_err(|err| ChunkStoreError::internal("Failed to store chunk", err))
    }

    pub async fn retrieve_chunk(&self, chunk_id: &str) -> Result<Bytes, ChunkStoreError> {
        let path = self.chunk_path(chunk_id)?;
        match fs::read(&path).await {
            Ok(payload) => Ok(Bytes::from(payload)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ChunkStoreError::NotFound(chunk_id.to_string()))
            }
            Err(err) => Err(ChunkStoreError::internal("Failed to read chunk", err)),
        }
    }

    pub async fn chunk_count(&self) -> Result<usize, ChunkStoreError> {
        let mut entries = fs::read_dir(&self.chunks_dir)
            .await
            .map_err(|err| ChunkStoreError::internal("failed to list chunks", err))?;
        let mut count = 0usize;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| ChunkStoreError::internal("failed to list chunks", err))?
        {
            if !is_temp_file(&entry.path()) {
                count += 1;
            }
        }

        Ok(count)
    }

    fn chunk_path(&self, chunk_id: &str) -> Result<PathBuf, ChunkStoreError> {
        if !is_valid_chunk_id(chunk_id) {
            return Err(ChunkStoreError::InvalidChunkId(chunk_id.to_string()));
        }
        Ok(self.chunks_dir.join(chunk_id))
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TEMP_FILE_PREFIX))
}

fn unix_ts_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

async fn write_atomic(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("path has no parent: {}", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("chunk");

    // Hidden temp name so a concurrent writer of the same id never shares it.
    let tmp = parent.join(format!(
        "{TEMP_FILE_PREFIX}{file_name}-{}-{}-{}",
        std::process::id(),
        unix_ts_nanos(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&tmp, payload).await?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
