use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry of the remote bulk-data catalog.
///
/// Deserializes directly from the catalog's `data` array; unknown fields
/// (object, id, content_type, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    /// Logical snapshot type, e.g. `all_cards` or `default_cards`
    #[serde(rename = "type")]
    pub snapshot_type: String,
    pub updated_at: DateTime<Utc>,
    pub download_uri: String,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A snapshot file previously written to the local cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub snapshot_type: String,
    pub modified_at: DateTime<Utc>,
}

impl CachedFile {
    /// Age relative to `now`, clamped at zero for files stamped in the future
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.modified_at).max(chrono::Duration::zero())
    }
}

/// Counters for a single run. Only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionProgress {
    pub bytes_downloaded: u64,
    pub records_processed: u64,
}

impl IngestionProgress {
    pub fn add_bytes(&mut self, n: u64) {
        self.bytes_downloaded = self.bytes_downloaded.saturating_add(n);
    }

    pub fn add_records(&mut self, n: u64) {
        self.records_processed = self.records_processed.saturating_add(n);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_descriptor_from_catalog_entry() {
        let entry = serde_json::json!({
            "object": "bulk_data",
            "id": "922288cb-4bef-45e1-bb30-0c2bd3d3534f",
            "type": "all_cards",
            "updated_at": "2024-01-15T10:02:35.094+00:00",
            "uri": "https://api.scryfall.com/bulk-data/922288cb",
            "name": "All Cards",
            "size": 2298934563u64,
            "download_uri": "https://data.scryfall.io/all-cards/all-cards-20240115100235.json",
            "content_type": "application/json"
        });

        let descriptor: SnapshotDescriptor = serde_json::from_value(entry).unwrap();
        assert_eq!(descriptor.snapshot_type, "all_cards");
        assert_eq!(descriptor.size_bytes, 2_298_934_563);
        assert_eq!(descriptor.name.as_deref(), Some("All Cards"));
        assert_eq!(
            descriptor.updated_at.format("%Y%m%d%H%M%S").to_string(),
            "20240115100235"
        );
    }

    #[test]
    fn test_descriptor_without_size_defaults_to_zero() {
        let entry = serde_json::json!({
            "type": "rulings",
            "updated_at": "2024-01-15T10:02:35Z",
            "download_uri": "https://example.test/rulings.json"
        });

        let descriptor: SnapshotDescriptor = serde_json::from_value(entry).unwrap();
        assert_eq!(descriptor.size_bytes, 0);
        assert!(descriptor.name.is_none());
    }

    #[test]
    fn test_cached_file_age_never_negative() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let file = CachedFile {
            path: PathBuf::from("all_cards-20240115100235.json"),
            snapshot_type: "all_cards".to_string(),
            modified_at: now + chrono::Duration::minutes(5),
        };
        assert_eq!(file.age(now), chrono::Duration::zero());
    }

    #[test]
    fn test_progress_counters_accumulate() {
        let mut progress = IngestionProgress::default();
        progress.add_bytes(1024);
        progress.add_bytes(1024);
        progress.add_records(500);
        assert_eq!(progress.bytes_downloaded, 2048);
        assert_eq!(progress.records_processed, 500);
    }
}
