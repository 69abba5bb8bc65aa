//! Streaming snapshot downloader
//!
//! The body is streamed into `<dest>.part` and renamed onto `<dest>` once
//! it has been flushed and synced. Any failure after the temp file is
//! created removes both paths, so the cache never holds a truncated
//! snapshot under its final name.

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::http::map_send_error;
use crate::progress::format_bytes;
use crate::retry::RetryPolicy;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Percentage points between two progress notifications
pub const PROGRESS_STEP_PERCENT: u8 = 5;

/// A progress notification. Emitted only when `Content-Length` is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub percent: u8,
}

/// Receives download lifecycle events
pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, _url: &str, _total_bytes: Option<u64>) {}

    /// Called once per crossed progress step
    fn on_progress(&self, _progress: DownloadProgress) {}

    fn on_finish(&self, _bytes_downloaded: u64) {}
}

/// Reports progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ProgressObserver for LoggingObserver {
    fn on_start(&self, url: &str, total_bytes: Option<u64>) {
        match total_bytes {
            Some(total) => info!(url, size = %format_bytes(total), "Downloading snapshot"),
            None => info!(url, "Downloading snapshot (size unknown)"),
        }
    }

    fn on_progress(&self, progress: DownloadProgress) {
        info!(
            percent = progress.percent,
            downloaded = %format_bytes(progress.bytes_downloaded),
            total = %format_bytes(progress.total_bytes),
            "Download progress"
        );
    }

    fn on_finish(&self, bytes_downloaded: u64) {
        info!(size = %format_bytes(bytes_downloaded), "Download complete");
    }
}

/// Turns byte counts into step-aligned percentage notifications
#[derive(Debug)]
struct StepTracker {
    total: u64,
    last_step: u8,
}

impl StepTracker {
    fn new(total: u64) -> Self {
        Self {
            total,
            last_step: 0,
        }
    }

    /// New step reached by `downloaded` bytes, if any
    fn advance(&mut self, downloaded: u64) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let percent = (u128::from(downloaded) * 100 / u128::from(self.total)).min(100) as u8;
        let step = percent - percent % PROGRESS_STEP_PERCENT;
        if step > self.last_step {
            self.last_step = step;
            Some(step)
        } else {
            None
        }
    }
}

pub struct SnapshotDownloader {
    client: Client,
    retry: RetryPolicy,
    idle_timeout: Duration,
    max_redirects: usize,
    observer: Arc<dyn ProgressObserver>,
}

impl SnapshotDownloader {
    pub fn new(client: Client, config: &IngestConfig) -> Self {
        Self {
            client,
            retry: RetryPolicy::new(config.max_retries, config.retry_backoff()),
            idle_timeout: config.download_idle_timeout(),
            max_redirects: config.max_redirects,
            observer: Arc::new(LoggingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Download `url` to `dest`, retrying transient failures.
    ///
    /// Returns `dest` once the file is complete and closed.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let bytes = self
            .retry
            .run("snapshot download", cancel, move |attempt| async move {
                debug!(url, attempt, "Starting download attempt");
                self.download_once(url, dest, cancel).await
            })
            .await?;

        self.observer.on_finish(bytes);
        Ok(dest.to_path_buf())
    }

    async fn download_once(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            sent = self.client.get(url).send() => sent.map_err(|e| {
                map_send_error(e, url, self.max_redirects, IngestError::DownloadTransport)
            })?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(IngestError::DownloadStatus {
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        self.observer.on_start(url, total);

        let part = part_path(dest);
        let result = async {
            let file = File::create(&part).await?;
            let mut writer = BufWriter::new(file);
            let bytes = self.stream_body(response, &mut writer, total, cancel).await?;

            writer.flush().await?;
            let file = writer.into_inner();
            file.sync_all().await?;
            drop(file);

            tokio::fs::rename(&part, dest).await?;
            Ok::<u64, IngestError>(bytes)
        }
        .await;

        if result.is_err() {
            remove_if_present(&part).await;
            remove_if_present(dest).await;
        }
        result
    }

    async fn stream_body(
        &self,
        response: reqwest::Response,
        writer: &mut BufWriter<File>,
        total: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut stream = response.bytes_stream();
        let mut tracker = total.map(StepTracker::new);
        let mut downloaded: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    return Err(IngestError::DownloadStalled {
                        secs: self.idle_timeout.as_secs(),
                    })
                },
                Ok(None) => break,
                Ok(Some(chunk)) => chunk.map_err(IngestError::DownloadTransport)?,
            };

            writer.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let (Some(tracker), Some(total)) = (tracker.as_mut(), total) {
                if let Some(percent) = tracker.advance(downloaded) {
                    self.observer.on_progress(DownloadProgress {
                        bytes_downloaded: downloaded,
                        total_bytes: total,
                        percent,
                    });
                }
            }
        }

        if let Some(expected) = total {
            if downloaded != expected {
                return Err(IngestError::DownloadTruncated {
                    expected,
                    received: downloaded,
                });
            }
        }

        Ok(downloaded)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}
