//! Explicit application context.
//!
//! Every component is built once from [`AppConfig`] and shared through `Arc`s; nothing in the
//! core reads global state. Front ends hold a [`CoreContext`] and call into its parts.

use crate::{
    cache::{CacheManager, CacheStoreError, SqliteCacheStore},
    chain::ChainState,
    config::{AppConfig, ConfigError},
    explorer::Explorer,
    live::LiveUpdateSubscriber,
    metadata::ExplorerTransport,
    resolver::Resolver,
    upstream::{Dispatcher, EndpointPool, HttpTransport, Transport, UpstreamError},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build transport: {0}")]
    Transport(#[from] UpstreamError),

    #[error("failed to open persistent cache: {0}")]
    Store(#[from] CacheStoreError),
}

pub struct CoreContext {
    config: AppConfig,
    dispatcher: Arc<Dispatcher>,
    metadata: Option<Arc<Dispatcher>>,
    cache: Arc<CacheManager>,
    chain: Arc<ChainState>,
    explorer: Arc<Explorer>,
    resolver: Arc<Resolver>,
    live: Arc<LiveUpdateSubscriber>,
}

impl CoreContext {
    /// Validates `config` and builds every component over HTTP transports.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, an unbuildable HTTP client or an unopenable
    /// persistent cache.
    pub async fn from_config(config: AppConfig) -> Result<Self, ContextError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
        Self::with_transport(config, transport).await
    }

    /// Same as [`CoreContext::from_config`] with a caller-supplied node transport.
    ///
    /// # Errors
    ///
    /// See [`CoreContext::from_config`].
    pub async fn with_transport(config: AppConfig, transport: Arc<dyn Transport>) -> Result<Self, ContextError> {
        config.validate()?;

        let pool = Arc::new(EndpointPool::new(&config.endpoints, config.pool.clone()));
        pool.log_summary();
        let dispatcher = Arc::new(Dispatcher::new(pool, transport, config.dispatcher.clone()));
        let chain = Arc::new(ChainState::new(config.cache.reorg_window));

        let cache = match &config.cache.persistent_path {
            Some(path) if config.cache.enabled => {
                let store = Arc::new(SqliteCacheStore::open(path).await?);
                let cache = CacheManager::with_store(config.cache.clone(), Arc::clone(&chain), store);
                match cache.warm_from_store().await {
                    Ok(loaded) => info!(loaded, path = %path.display(), "cache warmed from disk"),
                    Err(e) => warn!(error = %e, "failed to warm cache from disk"),
                }
                Arc::new(cache)
            }
            _ => Arc::new(CacheManager::new(config.cache.clone(), Arc::clone(&chain))),
        };

        let metadata = if config.explorer.is_configured() {
            let api_key = config.explorer.api_key.clone().unwrap_or_default();
            let transport: Arc<dyn Transport> =
                Arc::new(ExplorerTransport::new(api_key, config.explorer.chain_id)?);
            let pool = Arc::new(EndpointPool::new(&[config.explorer.endpoint()], config.pool.clone()));
            Some(Arc::new(Dispatcher::new(pool, transport, config.dispatcher.clone())))
        } else {
            None
        };

        let mut explorer = Explorer::new(Arc::clone(&dispatcher), Arc::clone(&cache), Arc::clone(&chain));
        if let Some(metadata) = &metadata {
            explorer = explorer.with_metadata(Arc::clone(metadata));
        }
        let explorer = Arc::new(explorer);

        let resolver = Arc::new(Resolver::new(Arc::clone(&explorer), config.resolver.deadline()));
        let live = Arc::new(LiveUpdateSubscriber::new(
            Arc::clone(&dispatcher),
            Arc::clone(&cache),
            Arc::clone(&chain),
            config.live.clone(),
        ));

        info!(
            endpoints = config.endpoints.len(),
            cache_enabled = config.cache.enabled,
            metadata = metadata.is_some(),
            "core context initialized"
        );

        Ok(Self { config, dispatcher, metadata, cache, chain, explorer, resolver, live })
    }

    /// Spawns the live update loop; it stops when `cancel` fires.
    pub fn start_live(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.live.spawn(cancel)
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&Arc<Dispatcher>> {
        self.metadata.as_ref()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<ChainState> {
        &self.chain
    }

    #[must_use]
    pub fn explorer(&self) -> &Arc<Explorer> {
        &self.explorer
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    #[must_use]
    pub fn live(&self) -> &Arc<LiveUpdateSubscriber> {
        &self.live
    }
}
