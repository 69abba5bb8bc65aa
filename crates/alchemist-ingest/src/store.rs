//! Persistence adapters for canonical records
//!
//! Every adapter upserts on `slug`: writing a record whose slug already
//! exists overwrites the stored row instead of adding a second one.

use alchemist_common::CanonicalRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record {slug} rejected: {reason}")]
    Rejected { slug: String, reason: String },
}

#[async_trait]
pub trait CardStore: Send + Sync {
    /// Insert `record`, or overwrite the row with the same slug
    async fn upsert(&self, record: &CanonicalRecord) -> Result<(), StoreError>;
}

/// Process-local store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct InMemoryCardStore {
    records: Mutex<HashMap<String, CanonicalRecord>>,
    writes: AtomicU64,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct slugs stored
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, slug: &str) -> Option<CanonicalRecord> {
        self.lock().get(slug).cloned()
    }

    /// Upsert calls received, including overwrites
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CanonicalRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<(), StoreError> {
        if record.slug.is_empty() {
            return Err(StoreError::Rejected {
                slug: String::new(),
                reason: "empty slug".to_string(),
            });
        }
        self.lock().insert(record.slug.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(feature = "database")]
pub use postgres::PgCardStore;

#[cfg(feature = "database")]
mod postgres {
    use super::{CardStore, StoreError};
    use alchemist_common::CanonicalRecord;
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::types::Json;
    use sqlx::PgPool;
    use tracing::info;

    const UPSERT_CARD: &str = r#"
        INSERT INTO cards (
            slug, name, scryfall_id, oracle_id, type_line, category, rarity,
            set_code, cmc, mana_cost, cost, attack, defense, health,
            attributes, tags, image_url, description, is_published, record,
            created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7,
            $8, $9, $10, $11, $12, $13, $14,
            $15, $16, $17, $18, $19, $20,
            NOW(), NOW()
        )
        ON CONFLICT (slug) DO UPDATE SET
            name = EXCLUDED.name,
            scryfall_id = EXCLUDED.scryfall_id,
            oracle_id = EXCLUDED.oracle_id,
            type_line = EXCLUDED.type_line,
            category = EXCLUDED.category,
            rarity = EXCLUDED.rarity,
            set_code = EXCLUDED.set_code,
            cmc = EXCLUDED.cmc,
            mana_cost = EXCLUDED.mana_cost,
            cost = EXCLUDED.cost,
            attack = EXCLUDED.attack,
            defense = EXCLUDED.defense,
            health = EXCLUDED.health,
            attributes = EXCLUDED.attributes,
            tags = EXCLUDED.tags,
            image_url = EXCLUDED.image_url,
            description = EXCLUDED.description,
            is_published = EXCLUDED.is_published,
            record = EXCLUDED.record,
            updated_at = NOW()
        "#;

    /// Postgres-backed store.
    ///
    /// Expects a `cards` table with a unique index on `slug`:
    ///
    /// ```sql
    /// CREATE TABLE cards (
    ///     id BIGSERIAL PRIMARY KEY,
    ///     slug TEXT NOT NULL UNIQUE,
    ///     name TEXT NOT NULL,
    ///     scryfall_id TEXT,
    ///     oracle_id TEXT,
    ///     type_line TEXT,
    ///     category TEXT NOT NULL,
    ///     rarity TEXT NOT NULL,
    ///     set_code TEXT,
    ///     cmc DOUBLE PRECISION NOT NULL DEFAULT 0,
    ///     mana_cost TEXT,
    ///     cost JSONB NOT NULL DEFAULT '{}',
    ///     attack BIGINT NOT NULL DEFAULT 0,
    ///     defense BIGINT NOT NULL DEFAULT 0,
    ///     health BIGINT NOT NULL DEFAULT 0,
    ///     attributes TEXT[] NOT NULL DEFAULT '{}',
    ///     tags TEXT[] NOT NULL DEFAULT '{}',
    ///     image_url TEXT NOT NULL DEFAULT '',
    ///     description TEXT NOT NULL DEFAULT '',
    ///     is_published BOOLEAN NOT NULL DEFAULT TRUE,
    ///     record JSONB NOT NULL,
    ///     created_at TIMESTAMPTZ NOT NULL,
    ///     updated_at TIMESTAMPTZ NOT NULL
    /// );
    /// ```
    ///
    /// `record` holds the full canonical record, including the `extra` bag.
    #[derive(Clone)]
    pub struct PgCardStore {
        pool: PgPool,
    }

    impl PgCardStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(url)
                .await?;
            info!(max_connections, "Connected to card database");
            Ok(Self::new(pool))
        }

        pub fn pool(&self) -> &PgPool {
            &self.pool
        }
    }

    #[async_trait]
    impl CardStore for PgCardStore {
        async fn upsert(&self, record: &CanonicalRecord) -> Result<(), StoreError> {
            sqlx::query(UPSERT_CARD)
                .bind(&record.slug)
                .bind(&record.name)
                .bind(&record.scryfall_id)
                .bind(&record.oracle_id)
                .bind(&record.type_line)
                .bind(record.category.as_str())
                .bind(record.rarity.as_str())
                .bind(&record.set_code)
                .bind(record.cmc)
                .bind(&record.mana_cost)
                .bind(Json(&record.cost))
                .bind(record.attack)
                .bind(record.defense)
                .bind(record.health)
                .bind(&record.attributes)
                .bind(&record.tags)
                .bind(&record.image_url)
                .bind(&record.description)
                .bind(record.is_published)
                .bind(Json(record))
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_same_slug_keeps_one_row_with_latest_values() {
        let store = InMemoryCardStore::new();
        let first = normalize(&json!({ "name": "Lightning Bolt", "set": "lea" }));
        let second = normalize(&json!({ "name": "Lightning Bolt", "set": "m10" }));

        store.upsert(&first).await.unwrap();
        store.upsert(&second).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.writes(), 2);
        assert_eq!(store.get("lightning-bolt").unwrap().set_code.as_deref(), Some("m10"));
    }

    #[tokio::test]
    async fn test_empty_slug_is_rejected() {
        let store = InMemoryCardStore::new();
        let mut record = normalize(&json!({ "name": "Opt" }));
        record.slug.clear();

        let err = store.upsert(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(store.is_empty());
    }
}
