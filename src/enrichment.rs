// =============================================================================
// Per-holding metadata enrichment
// =============================================================================
//
// Runs after decomposition: every leaf holding missing sector/region/currency
// gets an ISIN (via the identity cascade, if it doesn't have one already)
// and then metadata from a provider-fronted API. Rate-limited serially — the
// donor's per-call delay becomes an explicit `tokio::time::sleep` between
// iterations rather than a decorator around the request function.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::identity::{resolve, ExternalLookup, HiveContributionSink, ResolutionCache};
use crate::types::Holding;

pub const DEFAULT_INTER_CALL_DELAY: Duration = Duration::from_millis(100);

/// Metadata returned by the provider-fronted enrichment API for a resolved
/// ISIN. A thin seam so tests can substitute a fixed table instead of a real
/// proxy round-trip.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch_metadata(&self, isin: &str) -> Option<HoldingMetadata>;
}

#[derive(Debug, Clone)]
pub struct HoldingMetadata {
    pub sector: Option<String>,
    pub region: Option<String>,
    pub currency: Option<String>,
}

pub struct Enricher {
    cache: Arc<ResolutionCache>,
    externals: Vec<Arc<dyn ExternalLookup>>,
    provider: Arc<dyn MetadataProvider>,
    inter_call_delay: Duration,
    hive_contribution: Option<Arc<HiveContributionSink>>,
}

impl Enricher {
    pub fn new(
        cache: Arc<ResolutionCache>,
        externals: Vec<Arc<dyn ExternalLookup>>,
        provider: Arc<dyn MetadataProvider>,
        inter_call_delay: Duration,
    ) -> Self {
        Self {
            cache,
            externals,
            provider,
            inter_call_delay,
            hive_contribution: None,
        }
    }

    /// Attach the contribution sink used for the cascade's fire-and-forget
    /// write-back to the Hive on external hits.
    pub fn with_hive_contribution(mut self, sink: Arc<HiveContributionSink>) -> Self {
        self.hive_contribution = Some(sink);
        self
    }

    /// Enrich every holding missing metadata in place, serially, with a
    /// fixed delay between provider calls. Never aborts: a failure at any
    /// step marks `needs_review` and moves on. `on_progress` is called after
    /// each holding is processed (whether or not it needed a provider call)
    /// with `(completed, total)`, so a caller can interpolate a progress
    /// percentage without breaking the delay's single continuous pass over
    /// the whole slice.
    pub async fn enrich_all(&self, holdings: &mut [Holding], mut on_progress: impl FnMut(usize, usize)) {
        let total = holdings.len();
        let mut first = true;
        for (i, holding) in holdings.iter_mut().enumerate() {
            if holding.sector.is_some() && holding.region.is_some() && holding.currency.is_some() {
                on_progress(i + 1, total);
                continue;
            }

            if !first {
                tokio::time::sleep(self.inter_call_delay).await;
            }
            first = false;

            self.enrich_one(holding).await;
            on_progress(i + 1, total);
        }
    }

    async fn enrich_one(&self, holding: &mut Holding) {
        let isin = if crate::identity::is_valid_isin(&holding.child_isin) {
            holding.child_isin.clone()
        } else {
            let entry = resolve(&holding.child_isin, &self.cache, &self.externals, self.hive_contribution.as_deref()).await;
            match entry.isin {
                Some(isin) => {
                    holding.child_isin = isin.clone();
                    isin
                }
                None => {
                    warn!(holding = %holding.name, "enrichment could not resolve an ISIN, marking for review");
                    holding.needs_review = true;
                    return;
                }
            }
        };

        match self.provider.fetch_metadata(&isin).await {
            Some(meta) => {
                holding.sector = meta.sector.or_else(|| holding.sector.take());
                holding.region = meta.region.or_else(|| holding.region.take());
                holding.currency = meta.currency.or_else(|| holding.currency.take());
            }
            None => {
                warn!(isin, "metadata provider returned nothing, marking for review");
                holding.needs_review = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider;

    #[async_trait]
    impl MetadataProvider for FixedProvider {
        async fn fetch_metadata(&self, isin: &str) -> Option<HoldingMetadata> {
            if isin == "US0378331005" {
                Some(HoldingMetadata {
                        sector: Some("Technology".into()),
                        region: Some("North America".into()),
                        currency: Some("USD".into()),
                    })
            } else {
                None
            }
        }
    }

    struct CountingProvider(Arc<AtomicUsize>);

    #[async_trait]
    impl MetadataProvider for CountingProvider {
        async fn fetch_metadata(&self, _isin: &str) -> Option<HoldingMetadata> {
            self.0.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    #[tokio::test]
    async fn enriches_holding_missing_metadata() {
        let enricher = Enricher::new(
            Arc::new(ResolutionCache::in_memory()),
            Vec::new(),
            Arc::new(FixedProvider),
            Duration::from_millis(0),
        );
        let mut holdings = vec![Holding::direct("US0378331005", "Apple", dec!(1.0))];
        enricher.enrich_all(&mut holdings, |_, _| {}).await;
        assert_eq!(holdings[0].sector.as_deref(), Some("Technology"));
        assert!(!holdings[0].needs_review);
    }

    #[tokio::test]
    async fn failed_metadata_marks_needs_review_without_aborting() {
        let calls = Arc::new(AtomicUsize::new(0));
        let enricher = Enricher::new(
            Arc::new(ResolutionCache::in_memory()),
            Vec::new(),
            Arc::new(CountingProvider(calls.clone())),
            Duration::from_millis(0),
        );
        let mut holdings = vec![
            Holding::direct("US0378331005", "Apple", dec!(0.5)),
            Holding::direct("US5949181045", "Microsoft", dec!(0.5)),
        ];
        enricher.enrich_all(&mut holdings, |_, _| {}).await;
        assert!(holdings.iter().all(|h| h.needs_review));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn progress_callback_fires_once_per_holding_in_order() {
        let enricher = Enricher::new(
            Arc::new(ResolutionCache::in_memory()),
            Vec::new(),
            Arc::new(FixedProvider),
            Duration::from_millis(0),
        );
        let mut holdings = vec![
            Holding::direct("US0378331005", "Apple", dec!(0.5)),
            Holding::direct("US5949181045", "Microsoft", dec!(0.5)),
        ];
        let mut seen = Vec::new();
        enricher.enrich_all(&mut holdings, |completed, total| seen.push((completed, total))).await;
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn already_enriched_holding_is_skipped() {
        let enricher = Enricher::new(
            Arc::new(ResolutionCache::in_memory()),
            Vec::new(),
            Arc::new(FixedProvider),
            Duration::from_millis(0),
        );
        let mut holding = Holding::direct("US0378331005", "Apple", dec!(1.0));
        holding.sector = Some("Existing".into());
        holding.region = Some("Existing".into());
        holding.currency = Some("USD".into());
        let mut holdings = vec![holding];
        enricher.enrich_all(&mut holdings, |_, _| {}).await;
        assert_eq!(holdings[0].sector.as_deref(), Some("Existing"));
    }
}
