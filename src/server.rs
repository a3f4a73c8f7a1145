use std::sync::Arc;

use snafu::ResultExt as _;
use tokio::net::TcpListener;

use crate::api::{create_router, App};
use crate::blob::{BlobStore, LocalBlobStore};
use crate::cache::{Cache, KeyValueCache, MemoryCache, RedisCache};
use crate::config::Config;
use crate::counter::{CounterStore, MemoryCounters, RedisCounters};
use crate::database::{RelationalStore, SurrealStore};
use crate::error::{
    ApplicationError, BindAddressSnafu, ConnectCacheSnafu, ConnectCountersSnafu,
    ConnectDatabaseSnafu, WebServerSnafu,
};
use crate::service::{
    Reconciler, Timeouts, VideoDetailService, VideoService, ViewAggregationService,
};
use crate::time::{Clock, SystemClock};

/// Connects every backend, serves the API until ctrl-c, then drains the reconciler.
pub async fn run(config: Config) -> Result<(), ApplicationError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn RelationalStore> = Arc::new(
        SurrealStore::connect(&config.database)
            .await
            .context(ConnectDatabaseSnafu)?,
    );

    let cache_backend: Arc<dyn KeyValueCache> = match &config.cache.url {
        Some(url) => Arc::new(RedisCache::connect(url).await.context(ConnectCacheSnafu)?),
        None => {
            tracing::warn!("no cache url configured, caching in process");
            Arc::new(MemoryCache::new(clock.clone()))
        }
    };

    let counters: Arc<dyn CounterStore> = match &config.counters.url {
        Some(url) => Arc::new(
            RedisCounters::connect(url)
                .await
                .context(ConnectCountersSnafu)?,
        ),
        None => {
            tracing::warn!("no counter url configured, counting in process");
            Arc::new(MemoryCounters::new())
        }
    };

    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.blob_dir));
    let cache = Cache::new(cache_backend, config.cache.timeout);
    let timeouts = Timeouts::new(config.views.database_timeout, config.counters.timeout);

    let (reconciler, reconciler_task) = Reconciler::spawn(
        store.clone(),
        counters.clone(),
        timeouts,
        config.counters.reconcile_queue,
    );

    let app = App::new(
        VideoDetailService::new(store.clone(), cache.clone(), config.cache.ttl, timeouts.database),
        ViewAggregationService::new(
            store.clone(),
            counters.clone(),
            cache.clone(),
            clock.clone(),
            reconciler.clone(),
            config.views.rearm_window,
            timeouts,
        ),
        VideoService::new(store, counters, blobs, cache, clock, reconciler, timeouts),
    );

    let address = config.host;
    let listener = TcpListener::bind(address)
        .await
        .context(BindAddressSnafu { address })?;
    tracing::info!(%address, "listening");

    let served = axum::serve(listener, create_router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(WebServerSnafu);

    reconciler_task.shutdown().await;
    served
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not listen for ctrl-c");
    }

    tracing::info!("shutting down");
}
