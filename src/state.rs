// =============================================================================
// Shared engine state — everything a handler needs, built once at startup
// =============================================================================
//
// Replaces the donor's scattered module-level singletons with one value
// handlers borrow from. The broker bridge, auth manager, and worker pool are
// still lazily constructed (spawns a child process only once actually
// needed) via `LazySingleton`; everything else is cheap enough to build
// eagerly in `main`.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::bridge::BrokerBridge;
use crate::config::Config;
use crate::enrichment::Enricher;
use crate::etf::AdapterRegistry;
use crate::identity::ResolutionCache;
use crate::singleton::LazySingleton;
use crate::store::PositionStore;
use crate::telemetry::HiveContributionToggle;
use crate::worker_pool::WorkerPool;

pub struct EngineState {
    pub config: Config,
    pub store: Arc<PositionStore>,
    pub cache: Arc<ResolutionCache>,
    pub registry: Arc<AdapterRegistry>,
    pub enricher: Arc<Enricher>,
    pub hive_contribution: Arc<HiveContributionToggle>,
    pub worker_pool: Arc<WorkerPool>,
    bridge_slot: LazySingleton<BrokerBridge>,
    auth_slot: LazySingleton<AuthManager>,
    broker_binary: String,
    broker_args: Vec<String>,
    cookie_path: PathBuf,
}

impl EngineState {
    pub fn new(
        config: Config,
        store: Arc<PositionStore>,
        cache: Arc<ResolutionCache>,
        registry: Arc<AdapterRegistry>,
        enricher: Arc<Enricher>,
        hive_contribution: Arc<HiveContributionToggle>,
        broker_binary: String,
        broker_args: Vec<String>,
    ) -> Self {
        let cookie_path = config.cookie_path();
        Self {
            config,
            store,
            cache,
            registry,
            enricher,
            hive_contribution,
            worker_pool: Arc::new(WorkerPool::new(crate::worker_pool::DEFAULT_WORKERS)),
            bridge_slot: LazySingleton::new(),
            auth_slot: LazySingleton::new(),
            broker_binary,
            broker_args,
            cookie_path,
        }
    }

    pub async fn bridge(&self) -> Arc<BrokerBridge> {
        let binary = self.broker_binary.clone();
        let args = self.broker_args.clone();
        self.bridge_slot
        .get_or_init(|| async move { Arc::new(BrokerBridge::new(binary, args)) })
        .await
    }

    pub async fn auth(&self) -> Arc<AuthManager> {
        let bridge = self.bridge().await;
        let cookie_path = self.cookie_path.clone();
        self.auth_slot
        .get_or_init(|| async move { Arc::new(AuthManager::new(bridge, cookie_path)) })
        .await
    }

    /// Shut down the worker pool and kill the bridge child, if one was ever
    /// spawned. Called once from the shutdown hook in `main`.
    pub async fn shutdown(&self) {
        if let Some(bridge) = self.bridge_slot.peek().await {
            bridge.shutdown().await;
        }
        self.worker_pool.shutdown().await;
    }
}
