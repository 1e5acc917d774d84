use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use common::{ChunkInfo, chunk_count, chunk_len, chunk_offset};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::pio;
use crate::pool::ConnectionPool;
use crate::progress::{ProgressObserver, spawn_reporter};
use crate::{CallContext, DfsClient, DfsError, RetryPolicy, TransferKind};

/// Result of one chunk transfer, addressed by its position in the file.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub index: u64,
    pub chunk_id: String,
    pub storage_node: String,
    pub result: Result<u64, DfsError>,
}

#[derive(Debug)]
pub struct TransferReport {
    pub kind: TransferKind,
    pub file_name: String,
    pub file_size: u64,
    pub transferred_bytes: u64,
    pub chunks: Vec<ChunkOutcome>,
}

impl TransferReport {
    pub fn failed_chunks(&self) -> Vec<u64> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.result.is_err())
            .map(|chunk| chunk.index)
            .collect()
    }

    /// Turns a report with failed chunks into the aggregate error.
    pub fn into_result(self) -> Result<Self, DfsError> {
        let failed_chunks = self.failed_chunks();
        if failed_chunks.is_empty() {
            return Ok(self);
        }

        Err(DfsError::PartialTransferFailure {
            operation: self.kind,
            file_name: self.file_name,
            failed_chunks,
            total_chunks: self.chunks.len(),
        })
    }
}

/// Everything one chunk task needs; owned so the task can be spawned.
struct ChunkJob {
    index: u64,
    chunk: ChunkInfo,
    offset: u64,
    len: u64,
    file: Arc<File>,
    pool: Arc<ConnectionPool>,
    retry: RetryPolicy,
    ctx: CallContext,
    progress: UnboundedSender<u64>,
}

impl ChunkJob {
    async fn upload(self) -> Result<u64, DfsError> {
        let data = self
            .ctx
            .run(async {
                pio::read_range(Arc::clone(&self.file), self.offset, self.len)
                    .await
                    .map_err(DfsError::from)
            })
            .await?;
        let sent = data.len() as u64;
        if sent != self.len {
            return Err(DfsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read {sent} of {} bytes for chunk {}; the file changed during upload",
                    self.len, self.chunk.chunk_id
                ),
            )));
        }

        let client = self
            .pool
            .get_connection(&self.chunk.storage_node, &self.ctx)
            .await?;

        self.retry
            .run(&self.ctx, |_| client.store_chunk(&self.ctx, &self.chunk.chunk_id, data.clone()))
            .await
            .map_err(|failure| failure.into_inner())?;

        let _ = self.progress.send(sent);
        debug!(chunk_id = %self.chunk.chunk_id, size_bytes = sent, "chunk uploaded");
        Ok(sent)
    }

    async fn download(self) -> Result<u64, DfsError> {
        let client = self
            .pool
            .get_connection(&self.chunk.storage_node, &self.ctx)
            .await?;
        let data: Bytes = self
            .retry
            .run(&self.ctx, |_| client.retrieve_chunk(&self.ctx, &self.chunk.chunk_id))
            .await
            .map_err(|failure| failure.into_inner())?;

        let received = data.len() as u64;
        if received != self.len {
            return Err(DfsError::Protocol(format!(
                "chunk {} from {} has {received} bytes, expected {}",
                self.chunk.chunk_id, self.chunk.storage_node, self.len
            )));
        }

        self.ctx
            .run(async {
                pio::write_range(Arc::clone(&self.file), self.offset, data)
                    .await
                    .map_err(DfsError::from)
            })
            .await?;

        let _ = self.progress.send(received);
        debug!(chunk_id = %self.chunk.chunk_id, size_bytes = received, "chunk downloaded");
        Ok(received)
    }
}

/// Pairs each chunk with its byte range. The chunk list must be exactly as
/// long as the file size and chunk size imply.
fn chunk_jobs(
    chunks: &[ChunkInfo],
    file_size: u64,
    chunk_size: u64,
) -> Result<Vec<(u64, ChunkInfo, u64, u64)>, DfsError> {
    let expected = chunk_count(file_size, chunk_size)
        .map_err(|err| DfsError::Protocol(format!("bad chunk layout: {err}")))?;
    if chunks.len() as u64 != expected {
        return Err(DfsError::Protocol(format!(
            "{} chunks listed for {file_size} bytes at chunk size {chunk_size}, expected {expected}",
            chunks.len()
        )));
    }

    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let index = index as u64;
            let len = chunk_len(index, file_size, chunk_size)
                .map_err(|err| DfsError::Protocol(format!("bad chunk layout: {err}")))?;
            Ok((index, chunk.clone(), chunk_offset(index, chunk_size), len))
        })
        .collect()
}

impl DfsClient {
    /// Uploads a local file under its base name.
    ///
    /// Every chunk is sent by its own task and every task runs to completion;
    /// chunks that were stored before a sibling failed stay on their nodes.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        ctx: &CallContext,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<TransferReport, DfsError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                DfsError::InvalidArgument(format!("no usable file name in {}", path.display()))
            })?
            .to_string();

        let file = ctx
            .run(async { tokio::fs::File::open(path).await.map_err(DfsError::from) })
            .await?;
        let stat = ctx
            .run(async { file.metadata().await.map_err(DfsError::from) })
            .await?;
        if !stat.is_file() {
            return Err(DfsError::InvalidArgument(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let file_size = stat.len();
        let file = Arc::new(file.into_std().await);

        let allocation = self
            .metadata
            .allocate_chunks(ctx, &file_name, file_size)
            .await?;
        info!(
            file_name = %file_name,
            file_size,
            num_chunks = allocation.chunks.len(),
            "chunks allocated, uploading"
        );

        let jobs = chunk_jobs(&allocation.chunks, file_size, allocation.chunk_size)?;

        self.run_transfer(
            TransferKind::Upload,
            file_name,
            file_size,
            file,
            jobs,
            ctx,
            progress,
        )
        .await
    }

    /// Downloads `file_name` into `output`, creating or truncating it.
    ///
    /// Chunks land at their own offsets in whatever order they arrive. On
    /// failure the partially written file is left as is.
    pub async fn download_file(
        &self,
        file_name: &str,
        output: impl AsRef<Path>,
        ctx: &CallContext,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<TransferReport, DfsError> {
        let output = output.as_ref();
        let info = self.metadata.get_file_info(ctx, file_name).await?;
        let jobs = chunk_jobs(&info.chunks, info.file_size, info.chunk_size)?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            ctx.run(async { tokio::fs::create_dir_all(parent).await.map_err(DfsError::from) })
                .await?;
        }
        let file = ctx
            .run(async {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .truncate(true)
                    .write(true)
                    .read(true)
                    .open(output)
                    .await
                    .map_err(DfsError::from)?;
                Ok::<_, DfsError>(file.into_std().await)
            })
            .await?;

        self.run_transfer(
            TransferKind::Download,
            file_name.to_string(),
            info.file_size,
            Arc::new(file),
            jobs,
            ctx,
            progress,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_transfer(
        &self,
        kind: TransferKind,
        file_name: String,
        file_size: u64,
        file: Arc<File>,
        jobs: Vec<(u64, ChunkInfo, u64, u64)>,
        ctx: &CallContext,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<TransferReport, DfsError> {
        let (progress_tx, reporter) = spawn_reporter(kind, file_size, progress);
        let mut slots: Vec<Option<Result<u64, DfsError>>> = jobs.iter().map(|_| None).collect();
        let chunks: Vec<ChunkInfo> = jobs.iter().map(|(_, chunk, _, _)| chunk.clone()).collect();

        let mut tasks = JoinSet::new();
        for (index, chunk, offset, len) in jobs {
            let job = ChunkJob {
                index,
                chunk,
                offset,
                len,
                file: Arc::clone(&file),
                pool: Arc::clone(&self.pool),
                retry: self.options.chunk_retry,
                ctx: ctx.clone(),
                progress: progress_tx.clone(),
            };
            tasks.spawn(async move {
                let index = job.index;
                let result = match kind {
                    TransferKind::Upload => job.upload().await,
                    TransferKind::Download => job.download().await,
                };
                (index, result)
            });
        }
        drop(progress_tx);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Some(slot) = slots.get_mut(index as usize) {
                        *slot = Some(result);
                    }
                }
                Err(err) => warn!(error = %err, %kind, file_name = %file_name, "chunk task aborted"),
            }
        }

        let transferred_bytes = reporter.await.unwrap_or(0);

        let outcomes: Vec<ChunkOutcome> = slots
            .into_iter()
            .zip(chunks)
            .enumerate()
            .map(|(index, (slot, chunk))| ChunkOutcome {
                index: index as u64,
                result: slot.unwrap_or_else(|| {
                    Err(DfsError::Internal(format!(
                        "no result for chunk {}",
                        chunk.chunk_id
                    )))
                }),
                chunk_id: chunk.chunk_id,
                storage_node: chunk.storage_node,
            })
            .collect();

        for outcome in &outcomes {
            if let Err(err) = &outcome.result {
                warn!(
                    %kind,
                    chunk_id = %outcome.chunk_id,
                    storage_node = %outcome.storage_node,
                    error = %err,
                    "chunk transfer failed"
                );
            }
        }

        let report = TransferReport {
            kind,
            file_name,
            file_size,
            transferred_bytes,
            chunks: outcomes,
        }
        .into_result()?;

        info!(
            %kind,
            file_name = %report.file_name,
            transferred_bytes = report.transferred_bytes,
            "transfer complete"
        );
        Ok(report)
    }
}
