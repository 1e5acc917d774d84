#[cfg(test)]
mod tests {
    use std::ffi::OsStr;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Stdio;
    use std::sync::{Arc, OnceLock};
    use std::time::Duration;

    use anyhow::{Context, Result, anyhow, bail};
    use client_sdk::{CallContext, ClientOptions, DfsClient, DfsError, NoProgress};
    use reqwest::StatusCode;
    use tokio::process::{Child, Command};
    use tokio::time::{Instant, sleep};
    use uuid::Uuid;

    const MIB: usize = 1024 * 1024;
    const STARTUP_TIMEOUT: Duration = Duration::from_secs(4);

    /// Temporary directory removed when dropped.
    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new(label: &str) -> Result<Self> {
            let path = std::env::temp_dir().join(format!("dfs-{label}-{}", Uuid::new_v4()));
            fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self(path))
        }

        fn path(&self) -> &Path {
            &self.0
        }

        fn join(&self, name: impl AsRef<Path>) -> PathBuf {
            self.0.join(name)
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    /// Where a registered storage node sits in the metadata registry, and
    /// whether a process is actually started for it.
    #[derive(Clone, Copy)]
    enum Slot {
        Live(&'static str),
        Dead(&'static str),
    }

    impl Slot {
        fn bind(self) -> &'static str {
            match self {
                Slot::Live(bind) | Slot::Dead(bind) => bind,
            }
        }
    }

    /// A metadata node plus its storage nodes. Every process is killed on
    /// drop, so a failing assertion never leaks servers.
    struct Cluster {
        metadata_url: String,
        storage_dirs: Vec<Option<ScratchDir>>,
        _processes: Vec<Child>,
    }

    impl Cluster {
        /// Registry order follows `slots`; round-robin placement sends chunk
        /// `i` to slot `i % slots.len()`.
        async fn start(name: &str, metadata_bind: &str, slots: &[Slot]) -> Result<Self> {
            let mut processes = Vec::new();
            let mut storage_dirs = Vec::new();

            for slot in slots {
                match slot {
                    Slot::Live(bind) => {
                        let dir = ScratchDir::new(&format!("{name}-storage"))?;
                        processes.push(
                            spawn_server(
                                Command::new(binary("storage-node")?)
                                    .env("DFS_STORAGE_BIND", bind)
                                    .env("DFS_STORAGE_DIR", dir.path()),
                                &format!("http://{bind}/health"),
                            )
                            .await?,
                        );
                        storage_dirs.push(Some(dir));
                    }
                    Slot::Dead(_) => storage_dirs.push(None),
                }
            }

            let registry = slots
                .iter()
                .map(|slot| format!("http://{}", slot.bind()))
                .collect::<Vec<_>>()
                .join(",");
            processes.push(
                spawn_server(
                    Command::new(binary("metadata-node")?)
                        .env("DFS_METADATA_BIND", metadata_bind)
                        .env("DFS_STORAGE_NODES", registry)
                        .env("DFS_CHUNK_SIZE_MB", "1"),
                    &format!("http://{metadata_bind}/health"),
                )
                .await?,
            );

            Ok(Self {
                metadata_url: format!("http://{metadata_bind}"),
                storage_dirs,
                _processes: processes,
            })
        }

        fn chunk_path(&self, slot: usize, chunk_id: &str) -> Result<PathBuf> {
            let dir = self.storage_dirs[slot]
                .as_ref()
                .ok_or_else(|| anyhow!("slot {slot} has no running storage node"))?;
            Ok(dir.join("chunks").join(chunk_id))
        }
    }

    fn patterned_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn cli_upload_list_download_round_trip() -> Result<()> {
        let cluster = Cluster::start(
            "roundtrip",
            "127.0.0.1:19180",
            &[Slot::Live("127.0.0.1:19181"), Slot::Live("127.0.0.1:19182")],
        )
        .await?;
        let work_dir = ScratchDir::new("roundtrip-work")?;
        let url = cluster.metadata_url.as_str();

        let source = work_dir.join("report.bin");
        let payload = patterned_bytes(2 * MIB + MIB / 2);
        fs::write(&source, &payload)?;

        let output = dfs(&["--metadata-url", url, "upload"], [&source]).await?;
        assert!(output.contains("File uploaded successfully."));

        assert_eq!(fs::read(cluster.chunk_path(0, "report.bin_0")?)?.len(), MIB);
        assert_eq!(fs::read(cluster.chunk_path(1, "report.bin_1")?)?.len(), MIB);
        assert_eq!(fs::read(cluster.chunk_path(0, "report.bin_2")?)?.len(), MIB / 2);

        let listing = dfs(&["--metadata-url", url, "list"], NO_PATHS).await?;
        assert!(listing.contains("Available Files:"));
        assert!(listing.contains("- report.bin (Size: 2.50 MB, Chunks: 3, Replicas: 1, Uploaded: "));

        let target = work_dir.join("restored").join("report.bin");
        let output = dfs(
            &["--metadata-url", url, "download", "report.bin", "--output"],
            [&target],
        )
        .await?;
        assert!(output.contains("File downloaded successfully."));
        assert_eq!(fs::read(&target)?, payload);

        Ok(())
    }

    #[tokio::test]
    async fn upload_with_middle_storage_node_down_keeps_other_chunks() -> Result<()> {
        let cluster = Cluster::start(
            "node-down",
            "127.0.0.1:19183",
            &[
                Slot::Live("127.0.0.1:19184"),
                Slot::Dead("127.0.0.1:19185"),
                Slot::Live("127.0.0.1:19194"),
            ],
        )
        .await?;
        let work_dir = ScratchDir::new("node-down-work")?;
        let url = cluster.metadata_url.as_str();

        let source = work_dir.join("split.bin");
        fs::write(&source, patterned_bytes(2 * MIB + 10))?;

        let stderr = dfs_failure(&["--metadata-url", url, "upload"], [&source]).await?;
        assert!(stderr.contains("1 of 3 chunks failed"), "stderr was: {stderr}");

        assert_eq!(fs::read(cluster.chunk_path(0, "split.bin_0")?)?.len(), MIB);
        assert_eq!(fs::read(cluster.chunk_path(2, "split.bin_2")?)?.len(), 10);
        assert!(!cluster.chunk_path(0, "split.bin_1")?.exists());
        assert!(!cluster.chunk_path(2, "split.bin_1")?.exists());

        let listing = dfs(&["--metadata-url", url, "list"], NO_PATHS).await?;
        assert!(listing.contains("- split.bin ("), "listing was: {listing}");

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_upload_is_rejected() -> Result<()> {
        let cluster = Cluster::start(
            "duplicate",
            "127.0.0.1:19186",
            &[Slot::Live("127.0.0.1:19187")],
        )
        .await?;
        let work_dir = ScratchDir::new("duplicate-work")?;
        let url = cluster.metadata_url.as_str();

        let source = work_dir.join("once.txt");
        fs::write(&source, b"only once")?;

        dfs(&["--metadata-url", url, "upload"], [&source]).await?;
        let stderr = dfs_failure(&["--metadata-url", url, "upload"], [&source]).await?;
        assert!(stderr.contains("already exists"), "stderr was: {stderr}");

        Ok(())
    }

    #[tokio::test]
    async fn sdk_download_of_unknown_file_is_not_found() -> Result<()> {
        let cluster = Cluster::start(
            "unknown",
            "127.0.0.1:19188",
            &[Slot::Live("127.0.0.1:19189")],
        )
        .await?;
        let work_dir = ScratchDir::new("unknown-work")?;

        let client = DfsClient::new(&cluster.metadata_url, ClientOptions::default())?;
        let err = client
            .download_file(
                "missing.bin",
                work_dir.join("missing.bin"),
                &CallContext::background(),
                Arc::new(NoProgress),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DfsError::NotFound(_)), "unexpected error: {err}");
        assert!(!work_dir.join("missing.bin").exists());
        assert!(client.list_files(&CallContext::background()).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn gateway_uploads_lists_and_downloads() -> Result<()> {
        let cluster = Cluster::start(
            "gateway",
            "127.0.0.1:19190",
            &[Slot::Live("127.0.0.1:19191"), Slot::Live("127.0.0.1:19192")],
        )
        .await?;
        let work_dir = ScratchDir::new("gateway-work")?;
        let gateway_bind = "127.0.0.1:19193";
        let _gateway = spawn_server(
            Command::new(binary("dfs")?)
                .args(["--metadata-url", cluster.metadata_url.as_str(), "serve-web", "--bind", gateway_bind])
                .arg("--staging-dir")
                .arg(work_dir.join("uploads"))
                .arg("--download-dir")
                .arg(work_dir.join("downloads")),
            &format!("http://{gateway_bind}/api/ping"),
        )
        .await?;
        let base = format!("http://{gateway_bind}");
        let http = reqwest::Client::new();

        let payload = patterned_bytes(MIB + 7);
        http.post(format!("{base}/upload"))
            .query(&[("file_name", "web.bin")])
            .body(payload.clone())
            .send()
            .await?
            .error_for_status()?;

        let files: serde_json::Value = http
            .get(format!("{base}/files"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        assert_eq!(files[0]["file_name"], "web.bin");
        assert_eq!(files[0]["num_chunks"], 2);

        let downloaded = http
            .get(format!("{base}/download/web.bin"))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        assert_eq!(downloaded.as_ref(), payload.as_slice());

        let missing = http.get(format!("{base}/download/nope.bin")).send().await?;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        assert_eq!(fs::read_dir(work_dir.join("uploads"))?.count(), 0);
        assert_eq!(fs::read_dir(work_dir.join("downloads"))?.count(), 0);

        Ok(())
    }

    const NO_PATHS: [&Path; 0] = [];

    /// Runs `dfs` with `args` followed by `paths`, returning stdout on success.
    async fn dfs<P: AsRef<OsStr>>(args: &[&str], paths: impl IntoIterator<Item = P>) -> Result<String> {
        let output = dfs_output(args, paths).await?;
        if !output.status.success() {
            bail!("dfs {args:?} failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs `dfs` expecting a non-zero exit, returning stderr.
    async fn dfs_failure<P: AsRef<OsStr>>(
        args: &[&str],
        paths: impl IntoIterator<Item = P>,
    ) -> Result<String> {
        let output = dfs_output(args, paths).await?;
        if output.status.success() {
            bail!(
                "dfs {args:?} exited 0 with: {}",
                String::from_utf8_lossy(&output.stdout)
            );
        }
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }

    async fn dfs_output<P: AsRef<OsStr>>(
        args: &[&str],
        paths: impl IntoIterator<Item = P>,
    ) -> Result<std::process::Output> {
        Command::new(binary("dfs")?)
            .args(args)
            .args(paths)
            .output()
            .await
            .context("failed to run dfs")
    }

    /// Spawns `command` quietly and returns once `ready_url` answers 200.
    async fn spawn_server(command: &mut Command, ready_url: &str) -> Result<Child> {
        let mut child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {:?}", command.as_std().get_program()))?;

        let http = reqwest::Client::new();
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        loop {
            if let Some(status) = child.try_wait()? {
                bail!("server for {ready_url} exited early with {status}");
            }
            let ready = http
                .get(ready_url)
                .send()
                .await
                .is_ok_and(|resp| resp.status() == StatusCode::OK);
            if ready {
                return Ok(child);
            }
            if Instant::now() >= deadline {
                bail!("{ready_url} not ready after {STARTUP_TIMEOUT:?}");
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    /// Path of a workspace binary. The first call builds all three binaries
    /// with the cargo running this test; later calls reuse that outcome.
    fn binary(name: &str) -> Result<PathBuf> {
        static TARGET_DIR: OnceLock<std::result::Result<PathBuf, String>> = OnceLock::new();

        let target_dir = TARGET_DIR
            .get_or_init(|| build_binaries().map_err(|err| format!("{err:#}")))
            .as_ref()
            .map_err(|message| anyhow!("building test binaries failed: {message}"))?;

        let path = target_dir
            .join("debug")
            .join(format!("{name}{}", std::env::consts::EXE_SUFFIX));
        if !path.is_file() {
            bail!("no binary at {}", path.display());
        }
        Ok(path)
    }

    fn build_binaries() -> Result<PathBuf> {
        let workspace = Path::new(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .nth(2)
            .context("system-tests is not inside a workspace")?;
        let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());

        let status = std::process::Command::new(cargo)
            .args(["build", "--bins", "-p", "metadata-node", "-p", "storage-node", "-p", "cli-client"])
            .current_dir(workspace)
            .status()
            .context("failed to invoke cargo")?;
        if !status.success() {
            bail!("cargo build exited with {status}");
        }

        Ok(std::env::var_os("CARGO_TARGET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace.join("target")))
    }
}
