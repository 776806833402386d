// =============================================================================
// Identity resolution cascade — ISIN validation, normalization, and
// the six-step lookup cascade with local caching
// =============================================================================

pub mod cache;
pub mod hive;
pub mod normalize;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, instrument, warn};

use crate::types::{ResolutionEntry, ResolutionSource};

pub use cache::ResolutionCache;
pub use hive::{HiveContributionSink, HiveLookup};

/// Confidence at or above this threshold is accepted outright.
pub const ACCEPT_THRESHOLD: Decimal = dec!(0.70);
/// Confidence below this threshold is rejected outright.
pub const REJECT_THRESHOLD: Decimal = dec!(0.50);

pub const NEGATIVE_TTL: Duration = Duration::from_secs(24 * 3600);
pub const RATE_LIMIT_TTL: Duration = Duration::from_secs(3600);

/// Outcome of a single cascade step, replacing exceptions-as-control-flow
/// in the donor with an explicit result the cascade loop matches on.
pub enum StepOutcome {
    Hit(ResolutionEntry),
    Miss,
    Skip(&'static str),
}

/// A cascade step that can reach external systems. Implementors for Hive and
/// each proxy-fronted provider live in their own crates/modules; this trait
/// keeps the cascade loop itself free of network concerns, mirroring the
/// event-bus abstraction used elsewhere in this codebase for I/O boundaries.
#[async_trait::async_trait]
pub trait ExternalLookup: Send + Sync {
    fn source(&self) -> ResolutionSource;
    async fn lookup(&self, normalized_key: &str) -> StepOutcome;
}

/// Validate an ISIN's structure and ISO 6166 mod-10 check digit.
pub fn is_valid_isin(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != 12 {
        return false;
    }
    if !bytes[0].is_ascii_uppercase() || !bytes[1].is_ascii_uppercase() {
        return false;
    }
    if !bytes[2..11].iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return false;
    }
    if !bytes[11].is_ascii_digit() {
        return false;
    }
    check_digit(&candidate[..11]) == (bytes[11] - b'0')
}

/// ISO 6166 check digit: expand letters to two digits (A=10..Z=35), run the
/// resulting digit string through the Luhn algorithm from the right.
fn check_digit(body: &str) -> u8 {
    let mut digits = String::with_capacity(body.len() * 2);
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            digits.push_str(&(c as u8 - b'A' + 10).to_string());
        }
    }

    let mut sum: u32 = 0;
    let mut double = true; // rightmost digit of the expanded string is doubled first
    for c in digits.chars().rev() {
        let mut d = c.to_digit(10).unwrap();
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    ((10 - (sum % 10)) % 10) as u8
}

/// Run the full cascade for a single identifier: ISIN passthrough, local
/// cache, then the supplied external steps in order. Stops at first hit.
/// `contribution`, when supplied, is offered every external hit so it can
/// queue a fire-and-forget write back to the Hive — the sink itself decides
/// whether the user has opted in.
#[instrument(skip(cache, externals, contribution), fields(key = %raw_key))]
pub async fn resolve(
    raw_key: &str,
    cache: &Arc<ResolutionCache>,
    externals: &[Arc<dyn ExternalLookup>],
    contribution: Option<&HiveContributionSink>,
) -> ResolutionEntry {
    let upper = raw_key.trim().to_uppercase();

    if is_valid_isin(&upper) {
        return ResolutionEntry {
            key: upper.clone(),
            isin: Some(upper),
            confidence: dec!(1.0),
            source: ResolutionSource::IsinDirect,
            expires_at: None,
            low_confidence: false,
        };
    }

    let variants = normalize::variants(&upper);

    for variant in &variants {
        if let Some(hit) = cache.get(variant).await {
            debug!(variant, "resolution cache hit");
            return hit;
        }
    }

    for external in externals {
        for variant in &variants {
            match external.lookup(variant).await {
                StepOutcome::Hit(mut entry) => {
                    entry.low_confidence = entry.confidence >= REJECT_THRESHOLD && entry.confidence < ACCEPT_THRESHOLD;
                    cache.put(variant, entry.clone()).await;
                    if let Some(sink) = contribution {
                        sink.enqueue(
                            "contribute_alias",
                            &serde_json::json!({
                                    "alias": variant,
                                    "isin": entry.isin,
                                    "source": entry.source.to_string(),
                                    "confidence": entry.confidence.to_string(),
                                }),
                        )
                        .await;
                    }
                    return entry;
                }
                StepOutcome::Skip(reason) => {
                    debug!(source = %external.source(), reason, "cascade step skipped");
                    continue;
                }
                StepOutcome::Miss => continue,
            }
        }
    }

    warn!(key = %raw_key, "identifier unresolved after full cascade");
    let unresolved = ResolutionEntry {
        key: upper.clone(),
        isin: None,
        confidence: Decimal::ZERO,
        source: ResolutionSource::Unresolved,
        expires_at: Some(chrono::Utc::now() + chrono::Duration::from_std(NEGATIVE_TTL).unwrap()),
        low_confidence: false,
    };
    cache.put(&upper, unresolved.clone()).await;
    unresolved
}

/// Break ties among multiple ISIN candidates returned by a single source:
/// highest confidence first, lexicographically smallest ISIN on a tie.
pub fn break_tie<'a>(candidates: &'a [(String, Decimal)]) -> Option<&'a (String, Decimal)> {
    candidates.iter().max_by(|a, b| {
            a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)) // reverse isin cmp so max_by picks the smallest
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_known_good_isin() {
        // Apple Inc.
        assert!(is_valid_isin("US0378331005"));
    }

    #[test]
    fn rejects_bad_check_digit() {
        assert!(!is_valid_isin("US0378331006"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_isin("US037833100"));
        assert!(!is_valid_isin("US03783310055"));
    }

    #[test]
    fn rejects_lowercase_country_code() {
        assert!(!is_valid_isin("us0378331005"));
    }

    #[tokio::test]
    async fn isin_passthrough_skips_cache_and_external() {
        let cache = Arc::new(ResolutionCache::in_memory());
        let externals: Vec<Arc<dyn ExternalLookup>> = Vec::new();
        let entry = resolve("US0378331005", &cache, &externals, None).await;
        assert_eq!(entry.isin.as_deref(), Some("US0378331005"));
        assert_eq!(entry.confidence, dec!(1.0));
        assert_eq!(entry.source, ResolutionSource::IsinDirect);
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_external_lookup() {
        let cache = Arc::new(ResolutionCache::in_memory());
        cache
        .put(
            "NVDA",
            ResolutionEntry {
                key: "NVDA".into(),
                isin: Some("US67066G1040".into()),
                confidence: dec!(0.95),
                source: ResolutionSource::Cache,
                expires_at: None,
                low_confidence: false,
            },
        )
        .await;
        let externals: Vec<Arc<dyn ExternalLookup>> = Vec::new();
        let entry = resolve("NVDA", &cache, &externals, None).await;
        assert_eq!(entry.isin.as_deref(), Some("US67066G1040"));
        assert_eq!(entry.source, ResolutionSource::Cache);
    }

    #[test]
    fn tie_break_prefers_smallest_isin_on_equal_confidence() {
        let candidates = vec![
            ("US9999999999".to_string(), dec!(0.8)),
            ("US0000000000".to_string(), dec!(0.8)),
        ];
        let winner = break_tie(&candidates).unwrap();
        assert_eq!(winner.0, "US0000000000");
    }

    struct FixedExternal(ResolutionEntry);

    #[async_trait::async_trait]
    impl ExternalLookup for FixedExternal {
        fn source(&self) -> ResolutionSource {
            ResolutionSource::Hive
        }
        async fn lookup(&self, _normalized_key: &str) -> StepOutcome {
            StepOutcome::Hit(self.0.clone())
        }
    }

    #[tokio::test]
    async fn external_hit_queues_a_hive_contribution_when_enabled() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::store::migrations::run(&pool).await.unwrap();
        let toggle = Arc::new(crate::telemetry::HiveContributionToggle::new(true));
        let sink = HiveContributionSink::new(Some(pool.clone()), toggle);

        let cache = Arc::new(ResolutionCache::in_memory());
        let externals: Vec<Arc<dyn ExternalLookup>> = vec![Arc::new(FixedExternal(ResolutionEntry {
                key: "NVDA".into(),
                isin: Some("US67066G1040".into()),
                confidence: dec!(0.90),
                source: ResolutionSource::Hive,
                expires_at: None,
                low_confidence: false,
            }))];

        let entry = resolve("NVDA", &cache, &externals, Some(&sink)).await;
        assert_eq!(entry.isin.as_deref(), Some("US67066G1040"));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hive_contribution_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count.0, 1);
    }

    #[test]
    fn tie_break_prefers_higher_confidence() {
        let candidates = vec![
            ("US9999999999".to_string(), dec!(0.6)),
            ("US0000000000".to_string(), dec!(0.9)),
        ];
        let winner = break_tie(&candidates).unwrap();
        assert_eq!(winner.0, "US9999999999");
    }
}
