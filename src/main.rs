// =============================================================================
// Portfolio Prism analytics engine — entry point
// =============================================================================
//
// A long-lived sidecar the host desktop shell spawns and drives over a
// line-delimited JSON command channel on stdin/stdout, with a development
// HTTP/SSE fallback behind `--http`. Starts with an empty adapter registry
// and a fresh position store; everything else (broker bridge, auth manager)
// is constructed lazily on first use.
// =============================================================================

mod aggregation;
mod api;
mod auth;
mod bridge;
mod config;
mod dispatcher;
mod enrichment;
mod error;
mod etf;
mod handlers;
mod identity;
mod pipeline;
mod protocol;
mod singleton;
mod state;
mod store;
mod telemetry;
mod transport;
mod types;
mod worker_pool;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::config::{Cli, Config};
use crate::dispatcher::Dispatcher;
use crate::enrichment::Enricher;
use crate::etf::AdapterRegistry;
use crate::identity::{ExternalLookup, HiveContributionSink, HiveLookup, ResolutionCache};
use crate::state::EngineState;
use crate::store::PositionStore;
use crate::telemetry::HiveContributionToggle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    telemetry::init();

    let cli = Cli::parse();
    let config = Config::load(cli)?;

    info!(data_dir = %config.data_dir.display(), "starting portfolio prism engine");

    let store = Arc::new(
        PositionStore::connect(&config.state_db_path())
        .await
        .map_err(|e| {
                error!(error = %e, "schema migration failed, aborting startup");
                e
            })?,
    );

    let pool = store.pool().clone();
    let cache = Arc::new(ResolutionCache::load(pool.clone()).await?);
    let registry = Arc::new(AdapterRegistry::new());

    let hive_contribution = Arc::new(HiveContributionToggle::new(false));
    let hive_lookup: Arc<dyn ExternalLookup> = Arc::new(HiveLookup::new(std::env::var("PRISM_HIVE_BASE_URL").ok()));
    let hive_sink = Arc::new(HiveContributionSink::new(Some(pool), hive_contribution.clone()));
    let enricher = Arc::new(
        Enricher::new(
            cache.clone(),
            vec![hive_lookup],
            Arc::new(NoopMetadataProvider),
            enrichment::DEFAULT_INTER_CALL_DELAY,
        )
        .with_hive_contribution(hive_sink),
    );

    let broker_binary = std::env::var("PRISM_BROKER_BRIDGE_BIN").unwrap_or_else(|_| "tr-bridge".to_string());

    let state = Arc::new(EngineState::new(
            config.clone(),
            store,
            cache,
            registry,
            enricher,
            hive_contribution,
            broker_binary,
            Vec::new(),
        ));
    let dispatcher = Arc::new(Dispatcher::new());

    let shutdown_state = state.clone();
    tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal, draining worker pool and broker bridge");
                shutdown_state.shutdown().await;
                std::process::exit(0);
            }
        });

    let result = if config.http_transport {
        transport::http::run(state.clone(), dispatcher.clone(), config.http_port, config.bind_all).await
    } else {
        transport::stdio::run(&state, &dispatcher).await
    };

    state.shutdown().await;
    result
}

/// Placeholder metadata provider wired in at startup until a real
/// proxy-fronted client is configured via environment.
struct NoopMetadataProvider;

#[async_trait::async_trait]
impl enrichment::MetadataProvider for NoopMetadataProvider {
    async fn fetch_metadata(&self, _isin: &str) -> Option<enrichment::HoldingMetadata> {
        None
    }
}
