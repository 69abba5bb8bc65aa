//! Shared fixtures for alchemist-ingest integration tests
//!
//! A catalog and its snapshot files are served from a `wiremock` server;
//! caches live in `tempfile` directories.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use alchemist_ingest::IngestConfig;
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, SystemTime};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const CATALOG_PATH: &str = "/bulk-data";
pub const UPDATED_AT: &str = "2024-01-15T10:02:35.000+00:00";
/// Cache file name for `UPDATED_AT`
pub const ALL_CARDS_FILE: &str = "all_cards-20240115100235.json";

/// Config pointed at `server`, with one attempt per network call
pub fn test_config(server: &MockServer, cache_dir: &Path) -> IngestConfig {
    IngestConfig {
        catalog_url: format!("{}{}", server.uri(), CATALOG_PATH),
        cache_dir: cache_dir.to_path_buf(),
        max_retries: 1,
        retry_backoff_ms: 10,
        ..IngestConfig::default()
    }
}

pub fn descriptor(server: &MockServer, snapshot_type: &str, size: usize) -> Value {
    json!({
        "object": "bulk_data",
        "type": snapshot_type,
        "name": snapshot_type.replace('_', " "),
        "updated_at": UPDATED_AT,
        "download_uri": format!("{}/files/{}.json", server.uri(), snapshot_type),
        "size": size,
        "content_type": "application/json"
    })
}

pub fn catalog_body(descriptors: Vec<Value>) -> Value {
    json!({ "object": "list", "has_more": false, "data": descriptors })
}

/// `count` distinct cards as a snapshot body
pub fn cards_snapshot(count: usize) -> Vec<u8> {
    let cards: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "object": "card",
                "id": format!("00000000-0000-0000-0000-{i:012}"),
                "name": format!("Card {i}"),
                "type_line": "Creature — Elf Druid",
                "mana_cost": "{1}{G}",
                "cmc": 2.0,
                "power": "1",
                "toughness": "1",
                "set": "tst",
                "rarity": "common"
            })
        })
        .collect();
    serde_json::to_vec(&cards).expect("serialize cards")
}

/// Serve a catalog advertising `all_cards` and `default_cards`, with
/// `body` as the `all_cards` snapshot.
pub async fn mount_catalog(server: &MockServer, body: &[u8]) {
    let descriptors = vec![
        descriptor(server, "all_cards", body.len()),
        descriptor(server, "default_cards", 0),
    ];
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body(descriptors)))
        .mount(server)
        .await;
}

pub async fn mount_snapshot(server: &MockServer, snapshot_type: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{snapshot_type}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Write `contents` to `path` and backdate its modification time
pub fn write_aged(path: &Path, contents: &str, age: Duration) {
    std::fs::write(path, contents).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

pub fn hours(n: u64) -> Duration {
    Duration::from_secs(n * 3600)
}
