//! Bulk-data catalog client
//!
//! The catalog endpoint answers with `{ "data": [ { type, updated_at,
//! download_uri, size, ... }, ... ] }`. One descriptor is picked per run by
//! its exact `type`.

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::http::map_send_error;
use crate::retry::RetryPolicy;
use alchemist_common::SnapshotDescriptor;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct SnapshotCatalogClient {
    client: Client,
    url: String,
    timeout: Duration,
    max_redirects: usize,
    retry: RetryPolicy,
}

impl SnapshotCatalogClient {
    pub fn new(client: Client, config: &IngestConfig) -> Self {
        Self {
            client,
            url: config.catalog_url.clone(),
            timeout: config.request_timeout(),
            max_redirects: config.max_redirects,
            retry: RetryPolicy::new(config.max_retries, config.retry_backoff()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch every snapshot descriptor the catalog advertises
    pub async fn fetch_catalog(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<SnapshotDescriptor>> {
        info!(url = %self.url, "Fetching bulk data catalog");

        let catalog = self
            .retry
            .run("catalog fetch", cancel, move |_| async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(IngestError::Cancelled),
                    result = self.fetch_once() => result,
                }
            })
            .await?;

        info!(snapshots = catalog.len(), "Catalog fetched");
        Ok(catalog)
    }

    async fn fetch_once(&self) -> Result<Vec<SnapshotDescriptor>> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                map_send_error(e, &self.url, self.max_redirects, IngestError::CatalogNetwork)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(IngestError::CatalogFetch {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.bytes().await.map_err(IngestError::CatalogNetwork)?;
        debug!(bytes = body.len(), "Catalog response received");
        parse_catalog(&body)
    }
}

/// Parse a catalog response body
pub fn parse_catalog(body: &[u8]) -> Result<Vec<SnapshotDescriptor>> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        IngestError::CatalogFormat(format!("Failed to parse JSON response: {}", e))
    })?;

    let data = match value.get("data") {
        Some(data @ Value::Array(_)) => data.clone(),
        _ => {
            return Err(IngestError::CatalogFormat(
                "Invalid response: missing data array".to_string(),
            ))
        },
    };

    serde_json::from_value(data)
        .map_err(|e| IngestError::CatalogFormat(format!("Invalid snapshot descriptor: {}", e)))
}

/// Pick the descriptor whose type matches exactly
pub fn select_by_type(
    catalog: &[SnapshotDescriptor],
    snapshot_type: &str,
) -> Result<SnapshotDescriptor> {
    catalog
        .iter()
        .find(|d| d.snapshot_type == snapshot_type)
        .cloned()
        .ok_or_else(|| IngestError::SnapshotTypeNotFound {
            requested: snapshot_type.to_string(),
            available: catalog.iter().map(|d| d.snapshot_type.clone()).collect(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "object": "list",
        "has_more": false,
        "data": [
            {
                "type": "all_cards",
                "updated_at": "2024-01-15T10:02:35.094+00:00",
                "download_uri": "https://data.example.test/all-cards.json",
                "size": 2298934563
            },
            {
                "type": "default_cards",
                "updated_at": "2024-01-15T09:10:12.512+00:00",
                "download_uri": "https://data.example.test/default-cards.json",
                "size": 459483712
            }
        ]
    }"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = parse_catalog(BODY.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[1].snapshot_type, "default_cards");
    }

    #[test]
    fn test_parse_catalog_rejects_non_json() {
        let err = parse_catalog(b"<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, IngestError::CatalogFormat(_)));
    }

    #[test]
    fn test_parse_catalog_requires_data_array() {
        let err = parse_catalog(br#"{"data": {"type": "all_cards"}}"#).unwrap_err();
        assert!(err.to_string().contains("missing data array"));

        let err = parse_catalog(br#"{"object": "list"}"#).unwrap_err();
        assert!(matches!(err, IngestError::CatalogFormat(_)));
    }

    #[test]
    fn test_select_by_type() {
        let catalog = parse_catalog(BODY.as_bytes()).unwrap();
        let selected = select_by_type(&catalog, "all_cards").unwrap();
        assert_eq!(selected.download_uri, "https://data.example.test/all-cards.json");
    }

    #[test]
    fn test_select_unknown_type_lists_all_types() {
        let catalog = parse_catalog(BODY.as_bytes()).unwrap();
        let message = select_by_type(&catalog, "invalid_type").unwrap_err().to_string();

        let (_, listed) = message.split_once("Available:").unwrap();
        let listed: Vec<&str> = listed.split(',').map(str::trim).collect();
        assert_eq!(listed, vec!["all_cards", "default_cards"]);
    }
}
