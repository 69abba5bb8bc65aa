//! Alchemist Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared domain types and logging for the Alchemist workspace.
//!
//! # Overview
//!
//! - **Types**: snapshot descriptors, cached snapshot files, the canonical
//!   card record and ingestion progress counters
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use alchemist_common::logging::{init_logging, LogConfig};
//! use alchemist_common::types::ManaCost;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!
//!     let mut cost = ManaCost::default();
//!     cost.add_generic(2);
//!     cost.add_symbol("R");
//!     tracing::info!(generic = cost.generic(), red = cost.symbol("r"), "Built cost");
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod types;

pub use types::{
    CachedFile, CanonicalRecord, CardCategory, CardStats, IngestionProgress, ManaCost, Rarity,
    SnapshotDescriptor,
};
