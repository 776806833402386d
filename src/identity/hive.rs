// =============================================================================
// Hive lookup — cascade step 4, and the local contribution queue for step 6
// =============================================================================
//
// The Hive itself is an external collaborator this engine only speaks to as
// a client; everything here is the client half of that contract. Offline is
// a documented outcome, not a failure: every read degrades to a miss rather
// than propagating an error up the cascade, and every write is queued
// locally for later delivery rather than sent inline.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal_macros::dec;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::identity::{ExternalLookup, StepOutcome};
use crate::telemetry::HiveContributionToggle;
use crate::types::{ResolutionEntry, ResolutionSource};

/// Cascade step 4: `lookup_alias_rpc` over HTTPS with an anonymous key.
/// `base_url` is `None` in any environment that hasn't configured one, in
/// which case every lookup is skipped rather than attempted.
pub struct HiveLookup {
    client: Client,
    base_url: Option<String>,
}

impl HiveLookup {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupAliasResponse {
    isin: Option<String>,
}

#[async_trait]
impl ExternalLookup for HiveLookup {
    fn source(&self) -> ResolutionSource {
        ResolutionSource::Hive
    }

    async fn lookup(&self, normalized_key: &str) -> StepOutcome {
        let Some(base_url) = &self.base_url else {
            return StepOutcome::Skip("hive base url not configured");
        };

        let response = self
        .client
        .post(format!("{base_url}/rpc/lookup_alias_rpc"))
        .json(&serde_json::json!({"alias": normalized_key}))
        .send()
        .await;

        let body = match response {
            Ok(r) if r.status().is_success() => r.json::<LookupAliasResponse>().await,
            Ok(r) => {
                debug!(status = %r.status(), "hive lookup returned a non-success status, treating as miss");
                return StepOutcome::Miss;
            }
            Err(e) => {
                debug!(error = %e, "hive unreachable, treating as miss");
                return StepOutcome::Miss;
            }
        };

        match body {
            Ok(LookupAliasResponse { isin: Some(isin) }) if crate::identity::is_valid_isin(&isin) => {
                StepOutcome::Hit(ResolutionEntry {
                        key: normalized_key.to_string(),
                        isin: Some(isin),
                        confidence: dec!(0.90),
                        source: ResolutionSource::Hive,
                        expires_at: None,
                        low_confidence: false,
                    })
            }
            Ok(_) => StepOutcome::Miss,
            Err(e) => {
                warn!(error = %e, "hive lookup response did not parse, treating as miss");
                StepOutcome::Miss
            }
        }
    }
}

/// Step 6's "fire-and-forget contribution": enqueues a row for later
/// delivery rather than calling out to the Hive inline. Gated by the
/// contribution toggle so a user who has opted out never has rows queued on
/// their behalf, and a no-op without a persistent pool (e.g. an in-memory
/// cache in tests).
pub struct HiveContributionSink {
    pool: Option<SqlitePool>,
    toggle: Arc<HiveContributionToggle>,
}

impl HiveContributionSink {
    pub fn new(pool: Option<SqlitePool>, toggle: Arc<HiveContributionToggle>) -> Self {
        Self { pool, toggle }
    }

    pub async fn enqueue(&self, rpc_name: &str, payload: &serde_json::Value) {
        if !self.toggle.is_enabled() {
            return;
        }
        let Some(pool) = &self.pool else {
            return;
        };

        let res = sqlx::query("INSERT INTO hive_contribution_queue (rpc_name, payload, created_at) VALUES (?1, ?2, ?3)")
        .bind(rpc_name)
        .bind(payload.to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await;

        if let Err(e) = res {
            warn!(error = %e, rpc_name, "failed to queue hive contribution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_lookup_is_skipped() {
        let hive = HiveLookup::new(None);
        assert!(matches!(hive.lookup("NVDA").await, StepOutcome::Skip(_)));
    }

    #[tokio::test]
    async fn unreachable_base_url_is_a_miss_not_an_error() {
        let hive = HiveLookup::new(Some("http://127.0.0.1:1".to_string()));
        assert!(matches!(hive.lookup("NVDA").await, StepOutcome::Miss));
    }

    #[tokio::test]
    async fn disabled_toggle_never_queues() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::store::migrations::run(&pool).await.unwrap();
        let sink = HiveContributionSink::new(Some(pool.clone()), Arc::new(HiveContributionToggle::new(false)));
        sink.enqueue("contribute_alias", &serde_json::json!({"alias": "NVDA"})).await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hive_contribution_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn enabled_toggle_queues_a_row() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::store::migrations::run(&pool).await.unwrap();
        let sink = HiveContributionSink::new(Some(pool.clone()), Arc::new(HiveContributionToggle::new(true)));
        sink.enqueue("contribute_alias", &serde_json::json!({"alias": "NVDA"})).await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hive_contribution_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count.0, 1);
    }
}
