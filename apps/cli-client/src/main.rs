use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_sdk::{
    Backoff, CallContext, ClientOptions, DfsClient, ProgressObserver, ProgressUpdate, RetryPolicy,
    TransferKind, default_download_path,
};
use common::FileSummary;

mod web;

#[derive(Debug, Parser)]
#[command(name = "dfs")]
#[command(about = "CLI client for the distributed file store")]
struct Cli {
    #[arg(long, env = "DFS_METADATA_URL", default_value = "http://127.0.0.1:50051")]
    metadata_url: String,
    /// Give up on the whole operation after this many seconds.
    #[arg(long, env = "DFS_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
    /// Attempts per chunk transfer; 1 disables retries.
    #[arg(long, env = "DFS_CHUNK_ATTEMPTS", default_value_t = 1)]
    chunk_attempts: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Upload {
        path: PathBuf,
    },
    Download {
        file_name: String,
        /// Defaults to dfs_downloads/<file_name>.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    List,
    ServeWeb {
        #[arg(long, default_value = "127.0.0.1:8081")]
        bind: String,
        #[arg(long, default_value = "uploads")]
        staging_dir: PathBuf,
        #[arg(long, default_value = client_sdk::DEFAULT_DOWNLOAD_DIR)]
        download_dir: PathBuf,
        #[arg(long, default_value_t = 1024)]
        max_upload_mb: usize,
    },
}

/// Rewrites one stderr line with the running percentage.
struct StderrProgress;

impl ProgressObserver for StderrProgress {
    fn on_progress(&self, update: ProgressUpdate) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", progress_line(&update));
        let _ = stderr.flush();
    }

    fn on_finish(&self, _update: ProgressUpdate) {
        eprintln!();
    }
}

fn progress_line(update: &ProgressUpdate) -> String {
    let verb = match update.kind {
        TransferKind::Upload => "Uploading",
        TransferKind::Download => "Downloading",
    };
    format!("{verb}... {:.2}% complete", update.percent())
}

fn format_file_line(file: &FileSummary) -> String {
    format!(
        "- {} (Size: {:.2} MB, Chunks: {}, Replicas: {}, Uploaded: {})",
        file.file_name,
        file.file_size as f64 / (1024.0 * 1024.0),
        file.num_chunks,
        file.num_replicas,
        file.upload_date
    )
}

/// Cancelled on ctrl-c; bounded by `--timeout-secs` when given.
fn command_context(timeout_secs: Option<u64>) -> CallContext {
    let ctx = match timeout_secs {
        Some(secs) => CallContext::with_timeout(Duration::from_secs(secs)),
        None => CallContext::background(),
    };

    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    ctx
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::ServeWeb { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let options = ClientOptions {
        chunk_retry: RetryPolicy::new(
            cli.chunk_attempts.max(1),
            Backoff::Exponential {
                initial: Duration::from_millis(200),
                max: Duration::from_secs(5),
            },
        ),
        ..ClientOptions::default()
    };
    let client = DfsClient::new(&cli.metadata_url, options)
        .with_context(|| format!("invalid metadata url {}", cli.metadata_url))?;

    match cli.command {
        Commands::Upload { path } => {
            let ctx = command_context(cli.timeout_secs);
            client
                .upload_file(&path, &ctx, Arc::new(StderrProgress))
                .await
                .with_context(|| format!("failed to upload {}", path.display()))?;
            println!("File uploaded successfully.");
        }
        Commands::Download { file_name, output } => {
            let output = match output {
                Some(path) => path,
                None => default_download_path(&file_name)?,
            };
            let ctx = command_context(cli.timeout_secs);
            client
                .download_file(&file_name, &output, &ctx, Arc::new(StderrProgress))
                .await
                .with_context(|| format!("failed to download {file_name}"))?;
            println!("File downloaded successfully.");
        }
        Commands::List => {
            let ctx = command_context(cli.timeout_secs);
            let files = client
                .list_files(&ctx)
                .await
                .context("failed to list files")?;
            println!("Available Files:");
            for file in &files {
                println!("{}", format_file_line(file));
            }
        }
        Commands::ServeWeb {
            bind,
            staging_dir,
            download_dir,
            max_upload_mb,
        } => {
            let bind_addr: SocketAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address {bind}"))?;
            let config = web::GatewayConfig {
                staging_dir,
                download_dir,
                max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            };
            web::serve(bind_addr, client, config).await?;
        }
    }

    Ok(())
}
