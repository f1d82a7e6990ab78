//! Streamed, cancellable HTTP downloads.
//!
//! Payloads go straight to disk through a `.part` temp file that is renamed
//! into place on success, so a half-written download is never mistaken for a
//! complete one. A cancelled or failed fetch may leave the `.part` file
//! behind; correctness relies on retry overwriting it.

mod progress;

pub use progress::{DownloadProgress, ProgressTracker};

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{ModelboxError, ModelboxResult};
use crate::runtime::constants::limits;

/// Progress sink invoked at most once per ~500ms of wall time.
pub type ProgressSink<'a> = &'a mut (dyn FnMut(&DownloadProgress) + Send);

/// Download seam. The provisioner talks to this trait so tests can count
/// calls and serve fixtures without a network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressSink<'_>,
    ) -> ModelboxResult<()>;
}

/// HTTP fetcher streaming to disk.
pub struct ArchiveFetcher {
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl ArchiveFetcher {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            client: reqwest::Client::new(),
            cancel,
        }
    }

    /// Token that aborts any in-flight transfer when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Default for ArchiveFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for ArchiveFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressSink<'_>,
    ) -> ModelboxResult<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ModelboxError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelboxError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        debug!(url, ?total, dest = %dest.display(), "starting download");

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ModelboxError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        // Stream into <dest>.part, rename on success. The rename keeps a
        // truncated transfer from ever carrying the final name.
        let part_path = partial_path(dest);
        let mut file = std::fs::File::create(&part_path).map_err(|e| {
            ModelboxError::Storage(format!("failed to create {}: {}", part_path.display(), e))
        })?;

        let mut tracker = ProgressTracker::new(total, limits::PROGRESS_INTERVAL);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ModelboxError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk
                .map_err(|e| ModelboxError::Transport(format!("stream from {url} failed: {e}")))?;

            file.write_all(&chunk).map_err(|e| {
                ModelboxError::Storage(format!("write to {} failed: {}", part_path.display(), e))
            })?;

            if let Some(progress) = tracker.record(chunk.len() as u64) {
                on_progress(&progress);
            }
        }

        // A declared length that was never reached means the connection was
        // cut mid-body; surface it as a transport failure, not success.
        if let Some(total) = total
            && tracker.bytes_downloaded() < total
        {
            return Err(ModelboxError::Transport(format!(
                "truncated body from {url}: {} of {} bytes",
                tracker.bytes_downloaded(),
                total
            )));
        }

        file.flush().map_err(|e| {
            ModelboxError::Storage(format!("flush of {} failed: {}", part_path.display(), e))
        })?;
        drop(file);

        std::fs::rename(&part_path, dest).map_err(|e| {
            ModelboxError::Storage(format!(
                "failed to move {} to {}: {}",
                part_path.display(),
                dest.display(),
                e
            ))
        })?;

        on_progress(&tracker.finish());
        info!(url, bytes = tracker.bytes_downloaded(), "download complete");
        Ok(())
    }
}

fn partial_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
