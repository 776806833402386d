// =============================================================================
// Pure roll-ups over enriched holdings
// =============================================================================

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::Holding;

#[derive(Debug, Clone, Serialize)]
pub struct ExposureBreakdown {
    pub label: String,
    pub value: Decimal,
    /// Fraction of portfolio total, `[0, 1]`.
    pub fraction: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopHolding {
    pub isin: String,
    pub name: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    pub total_gain: Decimal,
    pub day_change: Decimal,
    pub day_change_percent: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub by_sector: Vec<ExposureBreakdown>,
    pub by_region: Vec<ExposureBreakdown>,
    pub top_holdings: Vec<TopHolding>,
    pub summary: PortfolioSummary,
}

/// `holdings` carry absolute weights; `portfolio_total_value` and
/// `day_change`/`total_gain` are supplied by the caller from the position
/// store, since aggregation itself is a pure function of its inputs.
pub fn aggregate(
    holdings: &[Holding],
    portfolio_total_value: Decimal,
    total_gain: Decimal,
    day_change: Decimal,
    top_n: usize,
) -> AggregationResult {
    let by_sector = exposure_by(holdings, portfolio_total_value, |h| {
            h.sector.clone().unwrap_or_else(|| "Unclassified".to_string())
        });
    let by_region = exposure_by(holdings, portfolio_total_value, |h| {
            h.region.clone().unwrap_or_else(|| "Unclassified".to_string())
        });

    let mut ranked: Vec<TopHolding> = holdings
    .iter()
    .map(|h| TopHolding {
            isin: h.child_isin.clone(),
            name: h.name.clone(),
            value: h.weight * portfolio_total_value,
        })
    .collect();
    ranked.sort_by(|a, b| b.value.cmp(&a.value));
    ranked.truncate(top_n);

    let day_change_percent = if portfolio_total_value.is_zero() {
        Decimal::ZERO
    } else {
        day_change / portfolio_total_value * Decimal::from(100)
    };

    AggregationResult {
        by_sector,
        by_region,
        top_holdings: ranked,
        summary: PortfolioSummary {
            total_value: portfolio_total_value,
            total_gain,
            day_change,
            day_change_percent,
        },
    }
}

fn exposure_by(holdings: &[Holding], total: Decimal, key: impl Fn(&Holding) -> String) -> Vec<ExposureBreakdown> {
    let mut buckets: HashMap<String, Decimal> = HashMap::new();
    for h in holdings {
        let value = h.weight * total;
        *buckets.entry(key(h)).or_insert(Decimal::ZERO) += value;
    }

    let mut out: Vec<ExposureBreakdown> = buckets
    .into_iter()
    .map(|(label, value)| ExposureBreakdown {
            label,
            value,
            fraction: if total.is_zero() { Decimal::ZERO } else { value / total },
        })
    .collect();
    out.sort_by(|a, b| b.value.cmp(&a.value));
    out
}
