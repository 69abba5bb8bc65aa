//! Local snapshot cache
//!
//! Snapshots live in one directory as `<type>-<YYYYMMDDHHMMSS>.json`, the
//! timestamp being the catalog's `updated_at` in UTC. A file younger than
//! the TTL is reused instead of downloaded again, and [`CacheStore::prune`]
//! keeps only the newest files per type.
//!
//! The directory is assumed to have a single writer. Two runs sharing a
//! cache directory may race on file creation and deletion.

use crate::error::Result;
use alchemist_common::{CachedFile, SnapshotDescriptor};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const SNAPSHOT_EXTENSION: &str = "json";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Outcome of [`CacheStore::resolve_target`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub should_download: bool,
    /// Age of the existing file at `path`, if there is one
    pub age: Option<chrono::Duration>,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic file name for a snapshot version
    pub fn file_name(snapshot_type: &str, updated_at: DateTime<Utc>) -> String {
        format!(
            "{}-{}.{}",
            snapshot_type,
            updated_at.format(TIMESTAMP_FORMAT),
            SNAPSHOT_EXTENSION
        )
    }

    pub fn path_for(&self, descriptor: &SnapshotDescriptor) -> PathBuf {
        self.root
            .join(Self::file_name(&descriptor.snapshot_type, descriptor.updated_at))
    }

    /// Create the cache root and its parents. Safe to call repeatedly.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Decide whether the snapshot described by `descriptor` must be downloaded
    pub async fn resolve_target(&self, descriptor: &SnapshotDescriptor) -> Result<ResolvedTarget> {
        self.ensure_root().await?;
        let path = self.path_for(descriptor);

        let modified = match tokio::fs::metadata(&path).await {
            Ok(meta) => DateTime::<Utc>::from(meta.modified()?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cached snapshot");
                return Ok(ResolvedTarget {
                    path,
                    should_download: true,
                    age: None,
                });
            },
            Err(e) => return Err(e.into()),
        };

        let age = (Utc::now() - modified).max(chrono::Duration::zero());
        let fresh = age.to_std().map(|a| a < self.ttl).unwrap_or(true);
        let age_hours = (age.num_minutes() as f64 / 6.0).round() / 10.0;

        if fresh {
            info!(
                path = %path.display(),
                age_hours,
                "Using cached snapshot"
            );
        } else {
            info!(
                path = %path.display(),
                age_hours,
                "Cached snapshot is stale"
            );
        }

        Ok(ResolvedTarget {
            path,
            should_download: !fresh,
            age: Some(age),
        })
    }

    /// Snapshot files in the cache, newest first.
    ///
    /// With `snapshot_type` set, only files named `<type>-<timestamp>.json`
    /// for that type are returned. Without it, every `.json` file counts.
    pub async fn list(&self, snapshot_type: Option<&str>) -> Result<Vec<CachedFile>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(SNAPSHOT_EXTENSION));
            if !is_snapshot {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let parsed_type = parse_snapshot_type(stem);
            if let Some(wanted) = snapshot_type {
                if parsed_type != Some(wanted) {
                    continue;
                }
            }

            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            files.push(CachedFile {
                snapshot_type: parsed_type.unwrap_or(stem).to_string(),
                modified_at: DateTime::<Utc>::from(meta.modified()?),
                path,
            });
        }

        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(files)
    }

    /// Most recently modified snapshot of any type
    pub async fn latest_snapshot(&self) -> Result<Option<CachedFile>> {
        Ok(self.list(None).await?.into_iter().next())
    }

    /// Delete all but the `keep` newest snapshots of a type.
    ///
    /// Best effort: failures are logged and never returned. Returns the
    /// number of files removed.
    pub async fn prune(&self, snapshot_type: &str, keep: usize) -> usize {
        self.prune_except(snapshot_type, keep, None).await
    }

    /// Prune ahead of writing `incoming`, so that at most `keep` snapshots of
    /// the type exist once it lands. A stale file already at `incoming` is
    /// left for the download to replace and does not count.
    pub async fn make_room(&self, snapshot_type: &str, incoming: &Path, keep: usize) -> usize {
        self.prune_except(snapshot_type, keep.saturating_sub(1), Some(incoming))
            .await
    }

    async fn prune_except(&self, snapshot_type: &str, keep: usize, except: Option<&Path>) -> usize {
        let files = match self.list(Some(snapshot_type)).await {
            Ok(files) => files,
            Err(e) => {
                warn!(snapshot_type, error = %e, "Failed to list cached snapshots");
                return 0;
            },
        };

        let mut removed = 0;
        let candidates = files.iter().filter(|f| Some(f.path.as_path()) != except);
        for file in candidates.skip(keep) {
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    removed += 1;
                    info!(path = %file.path.display(), "Deleted old snapshot");
                },
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Failed to delete old snapshot")
                },
            }
        }
        removed
    }
}

/// `all_cards-20240115100235` -> `all_cards`
fn parse_snapshot_type(stem: &str) -> Option<&str> {
    let (snapshot_type, stamp) = stem.rsplit_once('-')?;
    let is_stamp = stamp.len() == 14 && stamp.bytes().all(|b| b.is_ascii_digit());
    (is_stamp && !snapshot_type.is_empty()).then_some(snapshot_type)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::SystemTime;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn descriptor(snapshot_type: &str) -> SnapshotDescriptor {
        SnapshotDescriptor {
            snapshot_type: snapshot_type.to_string(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 2, 35).unwrap(),
            download_uri: "https://data.example.test/snapshot.json".to_string(),
            size_bytes: 0,
            name: None,
        }
    }

    fn touch(path: &Path, age: Duration) {
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_file_name_is_second_precision_utc() {
        let name = CacheStore::file_name("all_cards", descriptor("all_cards").updated_at);
        assert_eq!(name, "all_cards-20240115100235.json");
    }

    #[test]
    fn test_parse_snapshot_type() {
        assert_eq!(parse_snapshot_type("all_cards-20240115100235"), Some("all_cards"));
        assert_eq!(parse_snapshot_type("all_cards"), None);
        assert_eq!(parse_snapshot_type("all_cards-2024"), None);
        assert_eq!(parse_snapshot_type("-20240115100235"), None);
    }

    #[tokio::test]
    async fn test_missing_root_is_created() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path().join("nested/bulk"), DAY);

        let target = cache.resolve_target(&descriptor("all_cards")).await.unwrap();
        assert!(target.should_download);
        assert!(target.age.is_none());
        assert!(cache.root().is_dir());

        cache.ensure_root().await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_file_skips_download() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        let desc = descriptor("all_cards");
        touch(&cache.path_for(&desc), Duration::from_secs(3600));

        let target = cache.resolve_target(&desc).await.unwrap();
        assert!(!target.should_download);
        assert_eq!(target.path, cache.path_for(&desc));
        assert!(target.age.unwrap() >= chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_stale_file_triggers_download() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        let desc = descriptor("all_cards");
        touch(&cache.path_for(&desc), Duration::from_secs(25 * 3600));

        let target = cache.resolve_target(&desc).await.unwrap();
        assert!(target.should_download);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_per_type() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        for (i, stamp) in ["20240101000000", "20240102000000", "20240103000000", "20240104000000"]
            .iter()
            .enumerate()
        {
            let age = Duration::from_secs((10 - i as u64) * 3600);
            touch(&dir.path().join(format!("all_cards-{}.json", stamp)), age);
        }
        touch(&dir.path().join("default_cards-20240101000000.json"), DAY * 3);
        touch(&dir.path().join("all_cards-20240101000000.json.part"), DAY * 3);

        let removed = cache.prune("all_cards", 2).await;
        assert_eq!(removed, 2);

        let remaining = cache.list(Some("all_cards")).await.unwrap();
        let names: Vec<_> = remaining
            .iter()
            .map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["all_cards-20240104000000.json", "all_cards-20240103000000.json"]
        );
        assert!(dir.path().join("default_cards-20240101000000.json").exists());
        assert!(dir.path().join("all_cards-20240101000000.json.part").exists());
    }

    #[tokio::test]
    async fn test_prune_on_missing_directory_is_harmless() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path().join("absent"), DAY);
        assert_eq!(cache.prune("all_cards", 2).await, 0);
    }

    #[tokio::test]
    async fn test_make_room_ignores_file_being_replaced() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        let desc = descriptor("all_cards");
        let incoming = cache.path_for(&desc);
        touch(&dir.path().join("all_cards-20231201000000.json"), DAY * 40);
        touch(&dir.path().join("all_cards-20231101000000.json"), DAY * 70);
        touch(&incoming, DAY * 2);

        assert_eq!(cache.make_room("all_cards", &incoming, 2).await, 1);

        assert!(incoming.exists());
        assert!(dir.path().join("all_cards-20231201000000.json").exists());
        assert!(!dir.path().join("all_cards-20231101000000.json").exists());
    }

    #[tokio::test]
    async fn test_make_room_for_new_file() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        let incoming = cache.path_for(&descriptor("all_cards"));
        touch(&dir.path().join("all_cards-20231201000000.json"), DAY * 40);
        touch(&dir.path().join("all_cards-20231101000000.json"), DAY * 70);

        assert_eq!(cache.make_room("all_cards", &incoming, 2).await, 1);
        assert_eq!(cache.list(Some("all_cards")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_on_unreadable_root_returns_zero() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("bulk");
        std::fs::write(&root, b"not a directory").unwrap();
        let cache = CacheStore::new(&root, DAY);

        assert!(cache.list(Some("all_cards")).await.is_err());
        assert_eq!(cache.prune("all_cards", 0).await, 0);
        assert!(root.is_file());
    }

    #[tokio::test]
    async fn test_extension_match_ignores_case() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        touch(&dir.path().join("all_cards-20240101000000.JSON"), DAY);
        touch(&dir.path().join("export.Json"), Duration::from_secs(60));

        let all = cache.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].snapshot_type, "export");

        let typed = cache.list(Some("all_cards")).await.unwrap();
        assert_eq!(typed.len(), 1);
        assert_eq!(cache.prune("all_cards", 0).await, 1);
    }

    #[tokio::test]
    async fn test_latest_snapshot_ignores_type() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        touch(&dir.path().join("all_cards-20240101000000.json"), DAY);
        touch(&dir.path().join("default_cards-20240101000000.json"), Duration::from_secs(60));
        touch(&dir.path().join("notes.txt"), Duration::ZERO);

        let latest = cache.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.snapshot_type, "default_cards");
    }

    #[tokio::test]
    async fn test_latest_snapshot_empty_cache() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), DAY);
        assert!(cache.latest_snapshot().await.unwrap().is_none());
    }
}
