// =============================================================================
// Local resolution cache — persistent key-value store with an in-memory index
// =============================================================================
//
// Reads and the single writer all run on the event-loop thread, so the
// in-memory index only needs a `parking_lot::RwLock`, not a full async lock.
// Persistence to SQLite is write-through and best-effort: a failed persist
// is logged but never fails the caller, since the in-memory index is always
// authoritative for the life of the process.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tracing::warn;

use crate::types::{ResolutionEntry, ResolutionSource};

pub struct ResolutionCache {
    index: RwLock<HashMap<String, ResolutionEntry>>,
    pool: Option<SqlitePool>,
}

impl ResolutionCache {
    /// In-memory only, used by tests and anywhere persistence is irrelevant.
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            pool: None,
        }
    }

    /// Load the full table from `pool` into the in-memory index and return a
    /// cache backed by it for subsequent write-through persistence.
    pub async fn load(pool: SqlitePool) -> anyhow::Result<Self> {
        let rows = sqlx::query_as::<_, ResolutionRow>(
            "SELECT key, isin, confidence, source, expires_at, low_confidence FROM resolution_cache",
        )
        .fetch_all(&pool)
        .await?;

        let mut index = HashMap::with_capacity(rows.len());
        for row in rows {
            if let Some(entry) = row.into_entry() {
                index.insert(entry.key.clone(), entry);
            }
        }

        Ok(Self {
                index: RwLock::new(index),
                pool: Some(pool),
            })
    }

    /// Look up a key, treating an expired entry as a miss (but leaving it in
    /// place; expiry is advisory, re-resolution overwrites it).
    pub async fn get(&self, key: &str) -> Option<ResolutionEntry> {
        let hit = self.index.read().get(key).cloned()?;
        if let Some(expires_at) = hit.expires_at {
            if expires_at <= chrono::Utc::now() {
                return None;
            }
        }
        Some(hit)
    }

    pub async fn put(&self, key: &str, entry: ResolutionEntry) {
        self.index.write().insert(key.to_string(), entry.clone());

        if let Some(pool) = &self.pool {
            let res = sqlx::query(
                "INSERT INTO resolution_cache (key, isin, confidence, source, expires_at, low_confidence)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(key) DO UPDATE SET
                isin = excluded.isin,
                confidence = excluded.confidence,
                source = excluded.source,
                expires_at = excluded.expires_at,
                low_confidence = excluded.low_confidence",
            )
            .bind(key)
            .bind(entry.isin)
            .bind(entry.confidence.to_string())
            .bind(entry.source.to_string())
            .bind(entry.expires_at.map(|t| t.to_rfc3339()))
            .bind(entry.low_confidence)
            .execute(pool)
            .await;

            if let Err(e) = res {
                warn!(error = %e, key, "failed to persist resolution cache entry");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }
}

#[derive(sqlx::FromRow)]
struct ResolutionRow {
    key: String,
    isin: Option<String>,
    confidence: String,
    source: String,
    expires_at: Option<String>,
    low_confidence: bool,
}

impl ResolutionRow {
    fn into_entry(self) -> Option<ResolutionEntry> {
        let confidence: Decimal = self.confidence.parse().ok()?;
        let source = match self.source.as_str() {
            "ISIN_DIRECT" => ResolutionSource::IsinDirect,
            "CACHE" => ResolutionSource::Cache,
            "HIVE" => ResolutionSource::Hive,
            "WIKIDATA" => ResolutionSource::Wikidata,
            "OPENFIGI" => ResolutionSource::Openfigi,
            "FINNHUB" => ResolutionSource::Finnhub,
            "YFINANCE" => ResolutionSource::Yfinance,
            "UNRESOLVED" => ResolutionSource::Unresolved,
            "RATE_LIMITED" => ResolutionSource::RateLimited,
            _ => return None,
        };
        let expires_at = match self.expires_at {
            Some(s) => Some(chrono::DateTime::parse_from_rfc3339(&s).ok()?.with_timezone(&chrono::Utc)),
            None => None,
        };
        Some(ResolutionEntry {
                key: self.key,
                isin: self.isin,
                confidence,
                source,
                expires_at,
                low_confidence: self.low_confidence,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = ResolutionCache::in_memory();
        let entry = ResolutionEntry {
            key: "NVDA".into(),
            isin: Some("US67066G1040".into()),
            confidence: dec!(0.95),
            source: ResolutionSource::Cache,
            expires_at: None,
            low_confidence: false,
        };
        cache.put("NVDA", entry.clone()).await;
        let fetched = cache.get("NVDA").await.unwrap();
        assert_eq!(fetched.isin, entry.isin);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = ResolutionCache::in_memory();
        let entry = ResolutionEntry {
            key: "GHOST".into(),
            isin: None,
            confidence: Decimal::ZERO,
            source: ResolutionSource::Unresolved,
            expires_at: Some(chrono::Utc::now() - chrono::Duration::seconds(1)),
            low_confidence: false,
        };
        cache.put("GHOST", entry).await;
        assert!(cache.get("GHOST").await.is_none());
    }
}
