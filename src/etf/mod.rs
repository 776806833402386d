// =============================================================================
// ETF adapter contract, registry, and recursive decomposition
// =============================================================================

pub mod decompose;
pub mod registry;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::types::RawConstituent;

pub use decompose::{decompose_position, DecomposeOutcome, DEFAULT_MAX_DEPTH};
pub use registry::AdapterRegistry;

/// Common capability every ETF provider adapter implements. Individual
/// providers (iShares, Vanguard, Amundi, Xtrackers, VanEck) are external
/// collaborators specified only by this contract.
#[async_trait]
pub trait EtfAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch the ordered constituent list for `isin`. Implementations must
    /// validate `isin` before constructing any outbound request.
    async fn fetch_holdings(&self, isin: &str) -> EngineResult<Vec<RawConstituent>>;
}

/// Detects whether a batch of raw weights are expressed as decimals (sum
/// close to 1) or percentages (sum close to 100), per the adapter contract's
/// normalization rule, then returns weights rescaled to `[0, 1]`.
pub fn normalize_weights(raw: &[RawConstituent]) -> (Vec<Decimal>, WeightNormalizationReport) {
    let sum: Decimal = raw.iter().map(|c| c.weight).sum();
    let mut report = WeightNormalizationReport::default();

    let scale = if sum <= Decimal::new(105, 2) {
        // sum <= 1.05 -> already decimals
        Decimal::ONE
    } else if sum >= Decimal::from(50) {
        // sum >= 50 -> percentages
        Decimal::from(100)
    } else {
        report.ambiguous = true;
        Decimal::from(100)
    };

    let weights = raw
    .iter()
    .map(|c| {
            let w = c.weight / scale;
            if w.is_sign_negative() {
                report.clipped_negative += 1;
                Decimal::ZERO
            } else {
                w
            }
        })
    .collect();

    (weights, report)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WeightNormalizationReport {
    pub ambiguous: bool,
    pub clipped_negative: u32,
}

pub fn validate_isin_or_err(isin: &str) -> EngineResult<()> {
    if crate::identity::is_valid_isin(isin) {
        Ok(())
    } else {
        Err(EngineError::TickerInvalid(isin.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constituent(weight: &str) -> RawConstituent {
        RawConstituent {
            name: "x".into(),
            isin: None,
            ticker: None,
            weight: weight.parse().unwrap(),
            location: None,
            exchange: None,
        }
    }

    #[test]
    fn detects_decimal_weights() {
        let raw = vec![constituent("0.5"), constituent("0.5")];
        let (weights, report) = normalize_weights(&raw);
        assert_eq!(weights, vec!["0.5".parse().unwrap(), "0.5".parse().unwrap()]);
        assert!(!report.ambiguous);
    }

    #[test]
    fn detects_percent_weights() {
        let raw = vec![constituent("60"), constituent("40")];
        let (weights, _) = normalize_weights(&raw);
        assert_eq!(weights[0], "0.6".parse().unwrap());
        assert_eq!(weights[1], "0.4".parse().unwrap());
    }

    #[test]
    fn clips_negative_weight_to_zero() {
        let raw = vec![constituent("0.5"), constituent("-0.1")];
        let (weights, report) = normalize_weights(&raw);
        assert_eq!(weights[1], Decimal::ZERO);
        assert_eq!(report.clipped_negative, 1);
    }

    #[test]
    fn rejects_invalid_isin_before_fetch() {
        assert!(validate_isin_or_err("not-an-isin").is_err());
        assert!(validate_isin_or_err("US0378331005").is_ok());
    }
}
