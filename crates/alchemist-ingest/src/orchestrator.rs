//! End-to-end ingestion runs
//!
//! A run moves linearly through [`RunState`]:
//!
//! ```text
//! Idle -> Cataloged -> [Downloaded] -> Located -> Streaming -> Completed
//! ```
//!
//! `Downloaded` is skipped on a cache hit. Any error ends the run in
//! `Failed`. Runs are never retried here; batches committed before a failure
//! stay committed, and since every write is an upsert on `slug` a re-run
//! converges to the same rows.

use crate::cache::CacheStore;
use crate::catalog::{select_by_type, SnapshotCatalogClient};
use crate::committer::BatchCommitter;
use crate::config::IngestConfig;
use crate::download::{ProgressObserver, SnapshotDownloader};
use crate::error::{IngestError, Result};
use crate::http::build_client;
use crate::normalize::normalize;
use crate::progress::format_bytes;
use crate::record_stream::{RecordStream, StreamEvent};
use crate::store::CardStore;
use alchemist_common::{IngestionProgress, SnapshotDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Cataloged,
    Downloaded,
    Located,
    Streaming,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Snapshot file ready for ingestion
#[derive(Debug, Clone)]
pub struct AcquiredSnapshot {
    pub path: PathBuf,
    pub descriptor: SnapshotDescriptor,
    /// `false` when a fresh cached copy was reused
    pub downloaded: bool,
}

/// Summary of a completed ingestion
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub snapshot_path: PathBuf,
    pub records_committed: u64,
    /// Array elements that were not JSON objects
    pub records_skipped: u64,
    pub batches_committed: u64,
    /// Bytes of the snapshot file consumed by the parser
    pub bytes_read: u64,
    pub progress: IngestionProgress,
    pub elapsed: Duration,
}

pub struct IngestionOrchestrator {
    config: IngestConfig,
    catalog: SnapshotCatalogClient,
    cache: CacheStore,
    downloader: SnapshotDownloader,
    store: Arc<dyn CardStore>,
    cancel: CancellationToken,
    state: RunState,
    progress: IngestionProgress,
}

impl IngestionOrchestrator {
    pub fn new(config: IngestConfig, store: Arc<dyn CardStore>) -> Result<Self> {
        let client = build_client(&config)?;
        let catalog = SnapshotCatalogClient::new(client.clone(), &config);
        let downloader = SnapshotDownloader::new(client, &config);
        let cache = CacheStore::new(config.cache_dir.clone(), config.cache_ttl());

        Ok(Self {
            config,
            catalog,
            cache,
            downloader,
            store,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
            progress: IngestionProgress::default(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.downloader = self.downloader.with_observer(observer);
        self
    }

    /// Token that aborts the current and any later run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn progress(&self) -> IngestionProgress {
        self.progress
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Make sure a current snapshot of `snapshot_type` is on disk
    pub async fn acquire_snapshot(&mut self, snapshot_type: &str) -> Result<AcquiredSnapshot> {
        let span = info_span!("acquire", run_id = %Uuid::new_v4(), snapshot_type);
        async {
            self.begin();
            let result = self.acquire(snapshot_type).await;
            self.settle(result)
        }
        .instrument(span)
        .await
    }

    /// Download if needed, then ingest the snapshot
    pub async fn run(&mut self, snapshot_type: &str) -> Result<IngestionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, snapshot_type);
        async {
            self.begin();
            let result = match self.acquire(snapshot_type).await {
                Ok(snapshot) => self.ingest(run_id, &snapshot.path).await,
                Err(e) => Err(e),
            };
            self.settle(result)
        }
        .instrument(span)
        .await
    }

    /// Ingest the most recently modified file in the cache directory
    pub async fn sync_latest(&mut self) -> Result<IngestionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id);
        async {
            self.begin();
            let result = match self.locate_latest().await {
                Ok(path) => self.ingest(run_id, &path).await,
                Err(e) => Err(e),
            };
            self.settle(result)
        }
        .instrument(span)
        .await
    }

    /// Ingest an explicit snapshot file, bypassing catalog and cache
    pub async fn ingest_file(&mut self, path: &Path) -> Result<IngestionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, path = %path.display());
        async {
            self.begin();
            self.transition(RunState::Located);
            let result = self.ingest(run_id, path).await;
            self.settle(result)
        }
        .instrument(span)
        .await
    }

    /// Newest cached snapshot of any type
    pub async fn locate_latest(&mut self) -> Result<PathBuf> {
        let latest = self
            .cache
            .latest_snapshot()
            .await?
            .ok_or_else(|| IngestError::NoCachedSnapshot(self.cache.root().to_path_buf()))?;

        info!(
            path = %latest.path.display(),
            snapshot_type = %latest.snapshot_type,
            "Found latest snapshot"
        );
        self.transition(RunState::Located);
        Ok(latest.path)
    }

    async fn acquire(&mut self, snapshot_type: &str) -> Result<AcquiredSnapshot> {
        let catalog = self.catalog.fetch_catalog(&self.cancel).await?;
        let descriptor = select_by_type(&catalog, snapshot_type)?;
        info!(
            snapshot_type = %descriptor.snapshot_type,
            updated_at = %descriptor.updated_at,
            size = %format_bytes(descriptor.size_bytes),
            "Selected snapshot"
        );
        self.transition(RunState::Cataloged);

        let target = self.cache.resolve_target(&descriptor).await?;
        if !target.should_download {
            self.transition(RunState::Located);
            return Ok(AcquiredSnapshot {
                path: target.path,
                descriptor,
                downloaded: false,
            });
        }

        // Prune only once a download is certain.
        let removed = self
            .cache
            .make_room(snapshot_type, &target.path, self.config.cache_keep)
            .await;
        if removed > 0 {
            debug!(removed, "Pruned old snapshots");
        }

        let path = self
            .downloader
            .download(&descriptor.download_uri, &target.path, &self.cancel)
            .await?;
        let size = tokio::fs::metadata(&path).await?.len();
        self.progress.add_bytes(size);
        self.transition(RunState::Downloaded);
        self.transition(RunState::Located);

        Ok(AcquiredSnapshot {
            path,
            descriptor,
            downloaded: true,
        })
    }

    async fn ingest(&mut self, run_id: Uuid, path: &Path) -> Result<IngestionReport> {
        let started = Instant::now();
        info!(path = %path.display(), "Starting ingestion");

        let mut stream = RecordStream::open(path, self.config.max_record_bytes).await?;
        let mut committer = BatchCommitter::new(self.store.clone(), self.config.batch_size);
        let mut skipped = 0u64;
        self.transition(RunState::Streaming);

        loop {
            if self.cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let raw = match stream.next_event().await? {
                StreamEvent::Record(raw) => raw,
                StreamEvent::End => break,
            };

            if !raw.is_object() {
                skipped += 1;
                warn!(offset = stream.offset(), "Skipping non-object snapshot element");
                continue;
            }

            if committer.push(normalize(&raw)) {
                stream.pause();
                let committed = committer.commit().await;
                stream.resume();
                self.progress.add_records(committed? as u64);
            }
        }

        let before = committer.committed();
        let total = committer.flush().await?;
        self.progress.add_records(total - before);

        let report = IngestionReport {
            run_id,
            snapshot_path: path.to_path_buf(),
            records_committed: total,
            records_skipped: skipped,
            batches_committed: committer.batches_committed(),
            bytes_read: stream.offset(),
            progress: self.progress,
            elapsed: started.elapsed(),
        };
        self.transition(RunState::Completed);
        info!(
            records = report.records_committed,
            skipped = report.records_skipped,
            batches = report.batches_committed,
            read = %format_bytes(report.bytes_read),
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Ingestion complete"
        );
        Ok(report)
    }

    fn begin(&mut self) {
        self.state = RunState::Idle;
        self.progress = IngestionProgress::default();
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state changed");
        self.state = next;
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(state = ?self.state, error = %e, "Ingestion run failed");
            self.state = RunState::Failed;
        }
        result
    }
}
