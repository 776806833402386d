// =============================================================================
// ETF ISIN -> adapter registry, with a manual-upload fallback
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::etf::EtfAdapter;
use crate::types::RawConstituent;

/// Adapter returned when no provider is registered for an ISIN. Its
/// `fetch_holdings` always fails with `MANUAL_UPLOAD_REQUIRED`, pushing the
/// decision back to the user rather than guessing.
struct ManualUploadAdapter;

#[async_trait::async_trait]
impl EtfAdapter for ManualUploadAdapter {
    fn name(&self) -> &'static str {
        "manual_upload"
    }

    async fn fetch_holdings(&self, isin: &str) -> EngineResult<Vec<RawConstituent>> {
        Err(EngineError::ManualUploadRequired(isin.to_string()))
    }
}

pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn EtfAdapter>>,
    fallback: Arc<dyn EtfAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            fallback: Arc::new(ManualUploadAdapter),
        }
    }

    pub fn register(&mut self, isin: impl Into<String>, adapter: Arc<dyn EtfAdapter>) {
        self.adapters.insert(isin.into(), adapter);
    }

    /// Whether `isin` has a real provider adapter registered, i.e. whether it
    /// is itself further decomposable as an ETF.
    pub fn is_registered(&self, isin: &str) -> bool {
        self.adapters.contains_key(isin)
    }

    pub fn resolve(&self, isin: &str) -> Arc<dyn EtfAdapter> {
        match self.adapters.get(isin) {
            Some(a) => a.clone(),
            None => {
                warn!(isin, "no registered ETF adapter, falling back to manual upload");
                self.fallback.clone()
            }
        }
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_isin_falls_back_to_manual_upload() {
        let registry = AdapterRegistry::new();
        let adapter = registry.resolve("IE00B4L5Y983");
        let err = adapter.fetch_holdings("IE00B4L5Y983").await.unwrap_err();
        assert!(matches!(err, EngineError::ManualUploadRequired(_)));
    }
}
