//! Alchemist Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls bulk card snapshots from a Scryfall-style catalog and upserts them
//! into the card store.
//!
//! # Pipeline
//!
//! - **Catalog**: list the published snapshots and pick one by type
//! - **Cache**: reuse a fresh local copy or download a new one, pruning old files
//! - **Stream**: read the multi-gigabyte JSON array one element at a time
//! - **Normalize**: map each source card onto a [`CanonicalRecord`]
//! - **Commit**: upsert records on `slug` in fixed-size batches
//!
//! # Example
//!
//! ```no_run
//! use alchemist_ingest::{IngestConfig, IngestionOrchestrator, InMemoryCardStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let store = Arc::new(InMemoryCardStore::new());
//!     let mut orchestrator = IngestionOrchestrator::new(config, store)?;
//!
//!     let report = orchestrator.run("all_cards").await?;
//!     println!("Processed {} records", report.records_committed);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod committer;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod record_stream;
pub mod retry;
pub mod store;

pub use alchemist_common::CanonicalRecord;
pub use cache::{CacheStore, ResolvedTarget};
pub use catalog::SnapshotCatalogClient;
pub use committer::BatchCommitter;
pub use config::IngestConfig;
pub use download::{DownloadProgress, LoggingObserver, ProgressObserver, SnapshotDownloader};
pub use error::{IngestError, Result};
pub use orchestrator::{AcquiredSnapshot, IngestionOrchestrator, IngestionReport, RunState};
pub use progress::ProgressBarObserver;
pub use record_stream::{PauseControl, RecordStream, StreamEvent};
pub use retry::RetryPolicy;
#[cfg(feature = "database")]
pub use store::PgCardStore;
pub use store::{CardStore, InMemoryCardStore, StoreError};
