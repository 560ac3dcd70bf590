//! File system utils.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::watch;

pub struct FsHandler;

impl FsHandler {
    // The directory is bind-mounted into a container, which must be able to write to it.
    pub fn create_host_config_directory(host_config_path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(host_config_path)
            .context("Failed to create docker host data directory")?;
        tracing::debug!(
            "Created docker host data directory: {}",
            host_config_path.display()
        );

        let mut perms = std::fs::metadata(host_config_path)
            .context("Failed to get metadata for docker host data directory")?
            .permissions();
        perms.set_readonly(false);
        std::fs::set_permissions(host_config_path, perms)
            .context("Failed to set permissions on docker host data directory")?;

        Ok(())
    }

    /// Wait for a file to be created with a timeout.
    ///
    /// Watches the parent directory with `notify` rather than polling.
    pub async fn wait_for_file(path: &Path, timeout: Duration) -> anyhow::Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!("File already exists: {}", path.display());
            return Ok(());
        }

        tracing::debug!("Waiting for file: {}", path.display());

        let parent = path
            .parent()
            .context("File path must have a parent directory")?;

        let (tx, mut rx) = watch::channel(None);

        let path_watcher: PathBuf = path.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) if (event.kind.is_create() || event.kind.is_modify()) && event.paths.contains(&path_watcher) => {
                    tracing::debug!(event = ?event, path = ?path_watcher.display(), "File detected");

                    if let Err(e) = tx.send(Some(event.clone())) {
                        tracing::error!(err = ?e, path = ?path_watcher.display(), "Failed to send event to channel");
                    }
                }
                Ok(event) => {
                    tracing::trace!(event = ?event, path = ?path_watcher.display(), "Ignored event emitted by file watcher");
                }
                Err(e) => {
                    tracing::error!(err = ?e, path = ?path_watcher.display(), "Failed to watch directory");
                }
            })
            .context("Failed to create file watcher")?;

        watcher
            .watch(parent, RecursiveMode::NonRecursive)
            .context("Failed to watch directory")?;

        // The file may have appeared between the first check and the watch.
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }

        tokio::time::timeout(timeout, async {
            rx.changed()
                .await
                .map_err(|e| anyhow::anyhow!("File watcher channel closed: {}", e))
        })
        .await
        .context(format!("Timeout waiting for file: {}", path.display()))??;

        // The watcher may fire on creation before the writer has flushed.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(())
    }
}
