//! Domain types shared by the ingestion pipeline and its consumers

mod card;
mod snapshot;

pub use card::{CanonicalRecord, CardCategory, CardStats, ManaCost, Rarity};
pub use snapshot::{CachedFile, IngestionProgress, SnapshotDescriptor};
