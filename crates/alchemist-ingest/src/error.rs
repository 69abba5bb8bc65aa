//! Error types for the ingestion pipeline

use crate::store::StoreError;
use std::path::PathBuf;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Catalog endpoint answered with a non-200 status
    #[error("Catalog fetch failed: HTTP {status}: {reason}")]
    CatalogFetch { status: u16, reason: String },

    /// Catalog endpoint could not be reached
    #[error("Catalog request failed: {0}")]
    CatalogNetwork(#[source] reqwest::Error),

    #[error("Invalid catalog response: {0}")]
    CatalogFormat(String),

    #[error("Bulk data type \"{requested}\" not found. Available: {}", .available.join(", "))]
    SnapshotTypeNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("Too many redirects (limit {limit}) while fetching {url}")]
    TooManyRedirects { url: String, limit: usize },

    #[error("Download failed: HTTP {status}")]
    DownloadStatus { status: u16 },

    #[error("Download failed: {0}")]
    DownloadTransport(#[source] reqwest::Error),

    #[error("Download stalled: no data received for {secs}s")]
    DownloadStalled { secs: u64 },

    #[error("Download truncated: expected {expected} bytes, received {received}")]
    DownloadTruncated { expected: u64, received: u64 },

    /// Malformed JSON in the snapshot; `offset` is the byte position in the file
    #[error("Malformed snapshot at byte {offset}: {message}")]
    Parse { offset: u64, message: String },

    #[error("Commit failed: {0}")]
    Commit(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No cached snapshot found in {}", .0.display())]
    NoCachedSnapshot(PathBuf),

    #[error("Ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether a fresh attempt of the same network call could succeed.
    ///
    /// Server-side and transport failures are retryable. Client errors,
    /// malformed payloads and local failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::CatalogFetch { status, .. } | IngestError::DownloadStatus { status } => {
                retryable_status(*status)
            },
            IngestError::CatalogNetwork(_)
            | IngestError::DownloadTransport(_)
            | IngestError::DownloadStalled { .. }
            | IngestError::DownloadTruncated { .. } => true,
            _ => false,
        }
    }
}

fn retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_not_found_lists_available_types() {
        let err = IngestError::SnapshotTypeNotFound {
            requested: "invalid_type".to_string(),
            available: vec!["all_cards".to_string(), "default_cards".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("invalid_type"));
        assert!(message.contains("Available: all_cards, default_cards"));
    }

    #[test]
    fn test_catalog_fetch_message_carries_status() {
        let err = IngestError::CatalogFetch {
            status: 500,
            reason: "Internal Server Error".to_string(),
        };
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(IngestError::CatalogFetch { status: 503, reason: String::new() }.is_retryable());
        assert!(IngestError::DownloadStatus { status: 429 }.is_retryable());
        assert!(IngestError::DownloadStalled { secs: 30 }.is_retryable());
        assert!(!IngestError::DownloadStatus { status: 404 }.is_retryable());
        assert!(!IngestError::CatalogFormat("missing data".to_string()).is_retryable());
        assert!(!IngestError::Cancelled.is_retryable());
    }
}
