//! Chunk layout of a file.
//!
//! A file of `size` bytes is cut into `chunk_count(size, chunk_size)` chunks.
//! Every chunk is `chunk_size` long except the last one, which holds the
//! remainder. A zero-byte file still gets one (empty) chunk so that it can be
//! allocated, uploaded and downloaded like any other file.

/// Default chunk size: 64 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkingError {
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),
    #[error("chunk index {index} out of range for {count} chunks")]
    IndexOutOfRange { index: u64, count: u64 },
    #[error("storage node registry is empty")]
    EmptyRegistry,
}

pub fn chunk_count(size: u64, chunk_size: u64) -> Result<u64, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize(chunk_size));
    }
    Ok(size.div_ceil(chunk_size).max(1))
}

pub fn chunk_offset(index: u64, chunk_size: u64) -> u64 {
    index.saturating_mul(chunk_size)
}

pub fn chunk_len(index: u64, size: u64, chunk_size: u64) -> Result<u64, ChunkingError> {
    let count = chunk_count(size, chunk_size)?;
    if index >= count {
        return Err(ChunkingError::IndexOutOfRange { index, count });
    }
    if index + 1 < count {
        return Ok(chunk_size);
    }
    Ok(size - (count - 1) * chunk_size)
}

pub fn chunk_id(file_name: &str, index: u64) -> String {
    format!("{file_name}_{index}")
}

/// Whether `chunk_id` can name a plain file inside a storage node's chunk
/// directory. Ids that would escape it or shadow its temp files are rejected.
pub fn is_valid_chunk_id(chunk_id: &str) -> bool {
    !chunk_id.is_empty()
        && chunk_id != "."
        && chunk_id != ".."
        && !chunk_id.starts_with(TEMP_FILE_PREFIX)
        && !chunk_id.contains(['/', '\\', '\0'])
}

/// Prefix of in-flight chunk writes on a storage node.
pub const TEMP_FILE_PREFIX: &str = ".tmp-";

/// Round-robin placement: chunk `index` lives on `registry[index mod len]`.
pub fn placement(index: u64, registry: &[String]) -> Result<&str, ChunkingError> {
    if registry.is_empty() {
        return Err(ChunkingError::EmptyRegistry);
    }
    let slot = (index % registry.len() as u64) as usize;
    Ok(registry[slot].as_str())
}
