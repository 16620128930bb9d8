//! Process lifecycle: bootstrap, worker pool, graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pivault_core::config::VaultConfig;
use pivault_core::RetentionPolicy;
use pivault_engine::{Engine, EngineOptions, TracingAuditSink};
use pivault_keys::{StaticKekProvider, TekRegistry};
use pivault_store::{
    spawn_purge, spawn_workers, NoopCache, PersistQueue, PgStore, PgmqQueue, RedisCache,
    TokenCache, TokenStore, WorkerOptions, WorkerStats,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunMode {
    Engine,
    Worker,
}

/// Apply store migrations and exit.
pub async fn migrate(config: VaultConfig) -> Result<()> {
    let store = PgStore::connect(&config.database).await?;
    store.run_migrations().await?;
    let queue = PgmqQueue::connect(&config.queue).await?;
    queue.ensure_queue().await?;
    info!("migrations applied");
    Ok(())
}

pub async fn run(config: VaultConfig, mode: RunMode) -> Result<()> {
    info!(?mode, "daemon starting");

    // Durable store
    let pg = Arc::new(PgStore::connect(&config.database).await?);
    if mode == RunMode::Engine {
        pg.run_migrations().await.context("applying migrations")?;
    }
    info!("durable store connected");

    // Queue
    let pgmq = Arc::new(PgmqQueue::connect(&config.queue).await?);
    if mode == RunMode::Engine {
        pgmq.ensure_queue().await.context("ensuring queue")?;
    }
    info!(queue = %config.queue.name, "queue store connected");

    // Hot cache; a cache outage at startup degrades to store-only reads
    let cache: Arc<dyn TokenCache> = if config.cache.enabled {
        match RedisCache::connect(&config.cache).await {
            Ok(cache) => {
                info!(endpoint = %config.cache.url, "cache connected");
                Arc::new(cache)
            }
            Err(e) => {
                warn!("cache connection failed: {e}  (continuing without cache)");
                Arc::new(NoopCache)
            }
        }
    } else {
        info!("cache disabled via configuration");
        Arc::new(NoopCache)
    };

    let store: Arc<dyn TokenStore> = pg.clone();
    let queue: Arc<dyn PersistQueue> = pgmq.clone();

    // Engine (only the engine process needs the KEK)
    let engine: Option<Arc<Engine>> = if mode == RunMode::Engine {
        let kek_base64 = config
            .kek
            .kek_base64
            .as_deref()
            .context("KEK is not configured: set PIVAULT_KEK_BASE64")?;
        let kek = Arc::new(StaticKekProvider::from_base64(kek_base64)?);
        info!("KEK loaded");

        let registry = TekRegistry::new(kek.clone(), pg.clone(), config.engine.tek_cache_capacity);
        let default_retention = RetentionPolicy::parse_lenient(&config.engine.default_retention);

        Some(Arc::new(Engine::new(
            registry,
            kek,
            store.clone(),
            queue.clone(),
            cache.clone(),
            Arc::new(TracingAuditSink),
            EngineOptions {
                default_retention,
                cache_only_writes: config.engine.cache_only_writes,
            },
        )))
    } else {
        None
    };

    // Worker pool + purge loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stats = Arc::new(WorkerStats::default());

    let worker_opts = WorkerOptions {
        visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
        read_batch_size: config.queue.read_batch_size,
        poll_interval: Duration::from_secs(config.queue.poll_interval_secs),
    };
    let workers = spawn_workers(
        config.engine.workers,
        queue.clone(),
        store.clone(),
        cache.clone(),
        worker_opts,
        stats.clone(),
        shutdown_rx.clone(),
    );

    let purge = if mode == RunMode::Engine {
        Some(spawn_purge(
            store.clone(),
            Duration::from_secs(config.engine.purge_interval_secs),
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    // Metrics + health endpoints
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = crate::metrics::build_state(engine.clone(), stats.clone(), queue.clone());
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                warn!("metrics server failed: {e}");
            }
        });
    }

    info!("daemon ready");

    // Wait for SIGTERM or SIGINT, then drain
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    shutdown_tx.send(true).ok();
    for handle in workers {
        handle.await.ok();
    }
    if let Some(purge) = purge {
        purge.await.ok();
    }

    info!("daemon exiting cleanly");
    Ok(())
}
