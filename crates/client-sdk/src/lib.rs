use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::FileSummary;
use reqwest::Client;

mod context;
mod error;
mod pio;
mod pool;
mod progress;
mod retry;
mod rpc;
mod transfer;

pub use context::CallContext;
pub use error::{DfsError, TransferKind};
pub use pool::ConnectionPool;
pub use progress::{NoProgress, ProgressObserver, ProgressUpdate};
pub use retry::{Backoff, RetryFailure, RetryPolicy};
pub use rpc::{MetadataClient, StorageClient, normalize_base_url};
pub use transfer::{ChunkOutcome, TransferReport};

pub const DEFAULT_DOWNLOAD_DIR: &str = "dfs_downloads";

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Applied when dialling a storage node that is not yet in the pool.
    pub dial_retry: RetryPolicy,
    /// Applied to each chunk's store or retrieve call.
    pub chunk_retry: RetryPolicy,
    /// Per HTTP request, on top of whatever deadline the call context carries.
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dial_retry: RetryPolicy::dial_default(),
            chunk_retry: RetryPolicy::none(),
            request_timeout: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Uploads, downloads and lists files of one metadata service.
#[derive(Clone)]
pub struct DfsClient {
    metadata: MetadataClient,
    pool: Arc<ConnectionPool>,
    options: ClientOptions,
}

impl DfsClient {
    pub fn new(metadata_url: &str, options: ClientOptions) -> Result<Self, DfsError> {
        let mut builder = Client::builder().connect_timeout(options.connect_timeout);
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            metadata: MetadataClient::new(http.clone(), metadata_url)?,
            pool: Arc::new(ConnectionPool::new(http, options.dial_retry)),
            options,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn metadata(&self) -> &MetadataClient {
        &self.metadata
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn list_files(&self, ctx: &CallContext) -> Result<Vec<FileSummary>, DfsError> {
        Ok(self.metadata.list_files(ctx).await?.files)
    }
}

/// `dfs_downloads/<file_name>` below the current directory.
pub fn default_download_path(file_name: &str) -> Result<PathBuf, DfsError> {
    let base = Path::new(file_name)
        .file_name()
        .filter(|name| name.to_str() == Some(file_name))
        .ok_or_else(|| {
            DfsError::InvalidArgument(format!("{file_name} is not a plain file name"))
        })?;
    Ok(Path::new(DEFAULT_DOWNLOAD_DIR).join(base))
}
