// =============================================================================
// Shared domain types for the Portfolio Prism analytics engine
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sentinel parent ISIN used for holdings that were never part of an ETF.
pub const DIRECT_SENTINEL: &str = "DIRECT";

/// Finite state of the Trade Republic authentication facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthState {
    Idle,
    WaitingFor2fa,
    Authenticated,
    Error,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::WaitingFor2fa => write!(f, "WAITING_FOR_2FA"),
            Self::Authenticated => write!(f, "AUTHENTICATED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Source that produced an identity-resolution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionSource {
    IsinDirect,
    Cache,
    Hive,
    Wikidata,
    Openfigi,
    Finnhub,
    Yfinance,
    Unresolved,
    RateLimited,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IsinDirect => "ISIN_DIRECT",
            Self::Cache => "CACHE",
            Self::Hive => "HIVE",
            Self::Wikidata => "WIKIDATA",
            Self::Openfigi => "OPENFIGI",
            Self::Finnhub => "FINNHUB",
            Self::Yfinance => "YFINANCE",
            Self::Unresolved => "UNRESOLVED",
            Self::RateLimited => "RATE_LIMITED",
        };
        write!(f, "{s}")
    }
}

/// A single outcome of the identity resolution cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEntry {
    /// Normalized identifier that was looked up (ticker or name variant).
    pub key: String,
    pub isin: Option<String>,
    pub confidence: Decimal,
    pub source: ResolutionSource,
    /// `None` means no expiry.
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Set when `0.50 <= confidence < 0.70`.
    #[serde(default)]
    pub low_confidence: bool,
}

/// A position held in a portfolio, as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub isin: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub current_price: Decimal,
    pub name: String,
    pub portfolio_id: i64,
}

impl Position {
    /// Position value reported to consumers — always `quantity * price`, never
    /// the raw price alone.
    pub fn net_value(&self) -> Decimal {
        self.quantity * self.current_price
    }
}

/// A holding derived during ETF decomposition and enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    /// The ETF ISIN this holding was unwrapped from, or [`DIRECT_SENTINEL`].
    pub parent_isin: String,
    pub child_isin: String,
    pub name: String,
    /// Absolute fraction of the enclosing portfolio ETF position, in `[0, 1]`.
    pub weight: Decimal,
    pub sector: Option<String>,
    pub region: Option<String>,
    pub currency: Option<String>,
    /// Set when enrichment failed for this holding; the pipeline still
    /// completes but flags the holding for manual review.
    #[serde(default)]
    pub needs_review: bool,
}

impl Holding {
    pub fn direct(child_isin: impl Into<String>, name: impl Into<String>, weight: Decimal) -> Self {
        Self {
            parent_isin: DIRECT_SENTINEL.to_string(),
            child_isin: child_isin.into(),
            name: name.into(),
            weight,
            sector: None,
            region: None,
            currency: None,
            needs_review: false,
        }
    }
}

/// One constituent row returned by an ETF adapter, before weight normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConstituent {
    pub name: String,
    pub isin: Option<String>,
    pub ticker: Option<String>,
    pub weight: Decimal,
    pub location: Option<String>,
    pub exchange: Option<String>,
}

/// A single 0..=100 progress update, pushed through the one-way progress
/// channel towards the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: u8,
    pub message: String,
    pub phase: ProgressPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Sync,
    Pipeline,
    Enrichment,
    Aggregation,
    Done,
    Error,
}
