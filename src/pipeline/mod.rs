// =============================================================================
// Pipeline orchestrator — decompose -> enrich -> aggregate
// =============================================================================
//
// Instantiated fresh per run rather than kept as a singleton (open
// question: the donor's unused `get_pipeline()` singleton is resolved here
// in favor of per-run state isolation — there is nothing in a run worth
// sharing across invocations, and a singleton would only risk leaking state
// between unrelated runs).
// =============================================================================

pub mod reports;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::aggregation::{aggregate, AggregationResult};
use crate::enrichment::Enricher;
use crate::etf::{decompose_position, AdapterRegistry, DEFAULT_MAX_DEPTH};
use crate::identity::is_valid_isin;
use crate::store::PositionStore;
use crate::types::{Holding, ProgressEvent, ProgressPhase, DIRECT_SENTINEL};

use reports::{write_breakdown_csv_atomic, write_json_atomic, PipelineHealthReport};

pub struct PipelineConfig {
    pub portfolio_id: i64,
    pub max_decomposition_depth: u32,
    pub top_n_holdings: usize,
    pub health_report_path: PathBuf,
    pub breakdown_report_path: PathBuf,
    pub dashboard_report_path: PathBuf,
}

impl PipelineConfig {
    pub fn new(
        portfolio_id: i64,
        health_report_path: PathBuf,
        breakdown_report_path: PathBuf,
        dashboard_report_path: PathBuf,
    ) -> Self {
        Self {
            portfolio_id,
            max_decomposition_depth: DEFAULT_MAX_DEPTH,
            top_n_holdings: 10,
            health_report_path,
            breakdown_report_path,
            dashboard_report_path,
        }
    }
}

pub struct PipelineRunResult {
    pub run_id: String,
    pub success: bool,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub aggregation: Option<AggregationResult>,
}

/// Runs one pipeline execution against the supplied collaborators. A new
/// instance is constructed per call to `run` rather than reused, per the
/// design note above.
pub struct Pipeline {
    store: Arc<PositionStore>,
    registry: Arc<AdapterRegistry>,
    enricher: Arc<Enricher>,
    worker_pool: Arc<crate::worker_pool::WorkerPool>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<PositionStore>,
        registry: Arc<AdapterRegistry>,
        enricher: Arc<Enricher>,
        worker_pool: Arc<crate::worker_pool::WorkerPool>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            enricher,
            worker_pool,
            config,
        }
    }

    pub async fn run(&self, progress: mpsc::UnboundedSender<ProgressEvent>) -> PipelineRunResult {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut errors = Vec::new();

        let emit = |progress: &mpsc::UnboundedSender<ProgressEvent>, pct: u8, phase: ProgressPhase, message: &str| {
            let _ = progress.send(ProgressEvent {
                    progress: pct,
                    message: message.to_string(),
                    phase,
                });
        };

        let positions = match self.store.load_positions(self.config.portfolio_id).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to load positions for pipeline run");
                errors.push(format!("failed to load positions: {e}"));
                let result = PipelineRunResult {
                    run_id: run_id.clone(),
                    success: false,
                    errors,
                    duration_ms: started.elapsed().as_millis() as u64,
                    aggregation: None,
                };
                self.write_reports(&result, None).await;
                emit(&progress, 100, ProgressPhase::Error, "pipeline aborted before decomposition");
                return result;
            }
        };

        // Phase 1: decomposition.
        let mut holdings: Vec<Holding> = Vec::new();
        for position in &positions {
            if !is_valid_isin(&position.isin) {
                errors.push(format!("dropped position with invalid ISIN '{}'", position.isin));
                continue;
            }
            let net_value = position.net_value();
            if self.registry.is_registered(&position.isin) {
                let outcome =
                decompose_position(&position.isin, Decimal::ONE, &self.registry, self.config.max_decomposition_depth)
                .await;
                errors.extend(outcome.warnings);
                for mut h in outcome.holdings {
                    h.weight *= net_value;
                    holdings.push(h);
                }
            } else {
                let mut h = Holding::direct(position.isin.clone(), position.name.clone(), net_value);
                h.parent_isin = DIRECT_SENTINEL.to_string();
                holdings.push(h);
            }
        }

        if holdings.is_empty() && !positions.is_empty() {
            errors.push("no ETF could be decomposed and no direct holdings exist".to_string());
            let result = PipelineRunResult {
                run_id: run_id.clone(),
                success: false,
                errors,
                duration_ms: started.elapsed().as_millis() as u64,
                aggregation: None,
            };
            self.write_reports(&result, None).await;
            emit(&progress, 100, ProgressPhase::Error, "pipeline aborted: nothing decomposable");
            return result;
        }

        emit(&progress, 20, ProgressPhase::Pipeline, "decomposition complete");

        // Phase 2: enrichment. A single continuous pass over all holdings so
        // the enricher's inter-call delay actually rate-limits consecutive
        // provider calls; progress is interpolated between 40 and 70 via the
        // completed/total callback rather than by chunking the slice.
        self.enricher
        .enrich_all(&mut holdings, |completed, total| {
                let pct = 40 + (completed * 30 / total.max(1)) as u8;
                emit(&progress, pct.min(70), ProgressPhase::Enrichment, "enriching holdings");
            })
        .await;

        // Phase 3: aggregation.
        let total_value: Decimal = positions.iter().map(|p| p.net_value()).sum();
        let aggregation = aggregate(&holdings, total_value, Decimal::ZERO, Decimal::ZERO, self.config.top_n_holdings);
        emit(&progress, 85, ProgressPhase::Aggregation, "aggregation complete");

        let result = PipelineRunResult {
            run_id: run_id.clone(),
            success: errors.is_empty(),
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
            aggregation: Some(aggregation),
        };

        self.write_reports(&result, result.aggregation.as_ref()).await;
        emit(&progress, 100, ProgressPhase::Done, "pipeline run complete");
        info!(run_id = %result.run_id, success = result.success, "pipeline run finished");
        result
    }

    /// Writes the health report regardless of success, and the breakdown and
    /// dashboard reports only when aggregation actually produced one — a
    /// report for data that was never computed would be misleading, not
    /// merely incomplete. All writes fsync before renaming, so they run on
    /// the bounded worker pool rather than the event loop.
    async fn write_reports(&self, result: &PipelineRunResult, aggregation: Option<&AggregationResult>) {
        let health = PipelineHealthReport {
            run_id: result.run_id.clone(),
            success: result.success,
            errors: result.errors.clone(),
            duration_ms: result.duration_ms,
            holdings_count: aggregation.map(|a| a.top_holdings.len()).unwrap_or(0),
            generated_at: chrono::Utc::now(),
        };

        let health_path = self.config.health_report_path.clone();
        let health_result = self
        .worker_pool
        .run(move || write_json_atomic(&health_path, &health))
        .await;
        match health_result {
            Ok(Err(e)) => error!(error = %e, "failed to write pipeline health report"),
            Err(e) => error!(error = %e, "worker pool failed to write pipeline health report"),
            Ok(Ok(())) => {}
        }

        if let Some(agg) = aggregation.cloned() {
            let breakdown_path = self.config.breakdown_report_path.clone();
            let breakdown_agg = agg.clone();
            let breakdown_result = self
            .worker_pool
            .run(move || write_breakdown_csv_atomic(&breakdown_path, &breakdown_agg))
            .await;
            match breakdown_result {
                Ok(Err(e)) => error!(error = %e, "failed to write holdings breakdown report"),
                Err(e) => error!(error = %e, "worker pool failed to write holdings breakdown report"),
                Ok(Ok(())) => {}
            }

            let dashboard_path = self.config.dashboard_report_path.clone();
            let dashboard_result = self
            .worker_pool
            .run(move || write_json_atomic(&dashboard_path, &agg))
            .await;
            match dashboard_result {
                Ok(Err(e)) => error!(error = %e, "failed to write dashboard report"),
                Err(e) => error!(error = %e, "worker pool failed to write dashboard report"),
                Ok(Ok(())) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{HoldingMetadata, MetadataProvider};
    use crate::identity::ResolutionCache;
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    struct NoopProvider;
    #[async_trait::async_trait]
    impl MetadataProvider for NoopProvider {
        async fn fetch_metadata(&self, _isin: &str) -> Option<HoldingMetadata> {
            None
        }
    }

    async fn in_memory_store() -> PositionStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::store::migrations::run(&pool).await.unwrap();
        PositionStore::from_pool_for_test(pool)
    }

    #[tokio::test]
    async fn progress_is_monotone_non_decreasing() {
        let store = Arc::new(in_memory_store().await);
        store
        .replace_positions(
            1,
            &[crate::types::Position {
                    isin: "US0378331005".into(),
                    quantity: dec!(1),
                    avg_cost: dec!(100),
                    current_price: dec!(150),
                    name: "Apple".into(),
                    portfolio_id: 1,
                }],
        )
        .await
        .unwrap();

        let registry = Arc::new(AdapterRegistry::new());
        let enricher = Arc::new(Enricher::new(
                Arc::new(ResolutionCache::in_memory()),
                Vec::new(),
                Arc::new(NoopProvider),
                Duration::from_millis(0),
            ));
        let dir = std::env::temp_dir().join(format!("pipeline-test-{}", uuid::Uuid::new_v4()));
        let config = PipelineConfig::new(1, dir.join("health.json"), dir.join("breakdown.csv"), dir.join("dashboard.json"));

        let worker_pool = Arc::new(crate::worker_pool::WorkerPool::new(crate::worker_pool::DEFAULT_WORKERS));
        let pipeline = Pipeline::new(store, registry, enricher, worker_pool, config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = pipeline.run(tx).await;
        assert!(result.success);

        let mut last = -1i32;
        while let Ok(event) = rx.try_recv() {
            assert!(event.progress as i32 >= last);
            last = event.progress as i32;
        }
        assert_eq!(last, 100);
    }
}
