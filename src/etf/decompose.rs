// =============================================================================
// Recursive ETF unwrap, reworked as an iterative stack
// =============================================================================
//
// The donor recursed directly and relied on a global "seen" set to avoid
// infinite loops. We replace that with an explicit stack frame carrying the
// current decomposition path, so a cycle is only cut when an ETF reappears
// on its own ancestor chain — the same ETF appearing in two unrelated
// branches of one portfolio is not a cycle.
// =============================================================================

use rust_decimal::Decimal;

use crate::etf::{normalize_weights, AdapterRegistry};
use crate::types::{Holding, DIRECT_SENTINEL};

pub const DEFAULT_MAX_DEPTH: u32 = 3;

#[derive(Debug, Default)]
pub struct DecomposeOutcome {
    pub holdings: Vec<Holding>,
    pub warnings: Vec<String>,
}

struct Frame {
    isin: String,
    weight: Decimal,
    depth: u32,
    path: Vec<String>,
}

/// Decompose a single ETF position into absolute-weighted leaf holdings.
/// `root_isin` is the top-level ETF position's ISIN; `root_weight` is its
/// fraction of the overall portfolio (normally `1.0` — the caller scales by
/// position value separately).
pub async fn decompose_position(
    root_isin: &str,
    root_weight: Decimal,
    registry: &AdapterRegistry,
    max_depth: u32,
) -> DecomposeOutcome {
    let mut outcome = DecomposeOutcome::default();
    let mut stack = vec![Frame {
            isin: root_isin.to_string(),
            weight: root_weight,
            depth: 0,
            path: vec![root_isin.to_string()],
        }];

    while let Some(frame) = stack.pop() {
        if frame.depth >= max_depth {
            outcome
            .warnings
            .push(format!("{} exceeds max decomposition depth {max_depth}, stopping", frame.isin));
            continue;
        }

        let adapter = registry.resolve(&frame.isin);
        let raw = match adapter.fetch_holdings(&frame.isin).await {
            Ok(r) => r,
            Err(e) => {
                outcome.warnings.push(format!("{}: {e}", frame.isin));
                continue;
            }
        };

        let (weights, norm_report) = normalize_weights(&raw);
        if norm_report.ambiguous {
            outcome
            .warnings
            .push(format!("{}: ambiguous weight scale, assumed percent", frame.isin));
        }
        if norm_report.clipped_negative > 0 {
            outcome.warnings.push(format!(
                    "{}: clipped {} negative weight(s) to 0",
                    frame.isin, norm_report.clipped_negative
                ));
        }

        for (constituent, leaf_weight) in raw.iter().zip(weights) {
            let absolute_weight = frame.weight * leaf_weight;
            let child_isin = match &constituent.isin {
                Some(isin) if crate::identity::is_valid_isin(isin) => isin.clone(),
                Some(isin) => {
                    outcome
                    .warnings
                    .push(format!("dropped constituent with invalid ISIN '{isin}'"));
                    continue;
                }
                None => {
                    // No ISIN supplied by the adapter; kept as an unresolved
                    // leaf, to be picked up by the identity cascade during
                    // enrichment using its ticker/name instead.
                    constituent.ticker.clone().unwrap_or_else(|| constituent.name.clone())
                }
            };

            if registry.is_registered(&child_isin) {
                if frame.path.contains(&child_isin) {
                    outcome
                    .warnings
                    .push(format!("cycle detected: {child_isin} already in decomposition path, cutting edge"));
                    continue;
                }
                let mut path = frame.path.clone();
                path.push(child_isin.clone());
                stack.push(Frame {
                        isin: child_isin,
                        weight: absolute_weight,
                        depth: frame.depth + 1,
                        path,
                    });
            } else {
                outcome.holdings.push(Holding {
                        parent_isin: frame.isin.clone(),
                        child_isin,
                        name: constituent.name.clone(),
                        weight: absolute_weight,
                        sector: None,
                        region: None,
                        currency: None,
                        needs_review: false,
                    });
            }
        }
    }

    outcome
}

/// Wrap a non-ETF position as a single direct holding, bypassing
/// decomposition entirely.
pub fn direct_holding(isin: &str, name: &str, weight: Decimal) -> Holding {
    let mut h = Holding::direct(isin, name, weight);
    h.parent_isin = DIRECT_SENTINEL.to_string();
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineResult;
    use crate::etf::EtfAdapter;
    use crate::types::RawConstituent;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct FixedAdapter {
        rows: Vec<RawConstituent>,
    }

    #[async_trait]
    impl EtfAdapter for FixedAdapter {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn fetch_holdings(&self, _isin: &str) -> EngineResult<Vec<RawConstituent>> {
            Ok(self.rows.clone())
        }
    }

    fn constituent(isin: Option<&str>, name: &str, weight: &str) -> RawConstituent {
        RawConstituent {
            name: name.into(),
            isin: isin.map(str::to_string),
            ticker: None,
            weight: weight.parse().unwrap(),
            location: None,
            exchange: None,
        }
    }

    #[tokio::test]
    async fn flattens_single_level_etf() {
        let mut registry = AdapterRegistry::new();
        registry.register(
            "IE00B4L5Y983",
            Arc::new(FixedAdapter {
                    rows: vec![
                        constituent(Some("US0378331005"), "Apple", "0.6"),
                        constituent(Some("US5949181045"), "Microsoft", "0.4"),
                    ],
                }),
        );

        let outcome = decompose_position("IE00B4L5Y983", dec!(1.0), &registry, DEFAULT_MAX_DEPTH).await;
        assert_eq!(outcome.holdings.len(), 2);
        assert!(outcome.warnings.is_empty());
        let total: Decimal = outcome.holdings.iter().map(|h| h.weight).sum();
        assert_eq!(total, dec!(1.0));
    }

    #[tokio::test]
    async fn cuts_self_referential_cycle() {
        let mut registry = AdapterRegistry::new();
        registry.register(
            "IE00CYCLE017",
            Arc::new(FixedAdapter {
                    rows: vec![constituent(Some("IE00CYCLE017"), "Self ETF", "1.0")],
                }),
        );

        let outcome = decompose_position("IE00CYCLE017", dec!(1.0), &registry, DEFAULT_MAX_DEPTH).await;
        assert!(outcome.holdings.is_empty());
        assert!(outcome.warnings.iter().any(|w| w.contains("cycle")));
    }

    #[tokio::test]
    async fn multiplies_parent_weight_through_nested_etf() {
        let mut registry = AdapterRegistry::new();
        registry.register(
            "IE00PARENT06",
            Arc::new(FixedAdapter {
                    rows: vec![constituent(Some("IE00CHILD003"), "Nested ETF", "0.5")],
                }),
        );
        registry.register(
            "IE00CHILD003",
            Arc::new(FixedAdapter {
                    rows: vec![constituent(Some("US0378331005"), "Apple", "1.0")],
                }),
        );

        let outcome = decompose_position("IE00PARENT06", dec!(1.0), &registry, DEFAULT_MAX_DEPTH).await;
        assert_eq!(outcome.holdings.len(), 1);
        assert_eq!(outcome.holdings[0].weight, dec!(0.5));
    }
}
