//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  — Prometheus text format
//!   GET /healthz  — Liveness probe (always 200 if the process is running)
//!   GET /readyz   — Readiness probe (200 when all engine components report healthy)

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use pivault_core::HealthStatus;
use pivault_engine::Engine;
use pivault_store::{PersistQueue, WorkerStats};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone)]
pub struct HealthState {
    registry: Arc<Mutex<Registry>>,
    engine: Option<Arc<Engine>>,
}

/// Register gauges and start the sampler that keeps them current.
pub fn build_state(
    engine: Option<Arc<Engine>>,
    stats: Arc<WorkerStats>,
    queue: Arc<dyn PersistQueue>,
) -> HealthState {
    let mut registry = Registry::default();

    let processed: Gauge = Gauge::default();
    let failed: Gauge = Gauge::default();
    let poisoned: Gauge = Gauge::default();
    let queue_depth: Gauge = Gauge::default();

    registry.register(
        "pivault_worker_messages_processed",
        "Persistence messages stored and acknowledged",
        processed.clone(),
    );
    registry.register(
        "pivault_worker_messages_failed",
        "Persistence messages left for redelivery after a store failure",
        failed.clone(),
    );
    registry.register(
        "pivault_worker_messages_poisoned",
        "Unmarshallable persistence messages dropped",
        poisoned.clone(),
    );
    registry.register(
        "pivault_queue_depth",
        "Messages currently in the persistence queue",
        queue_depth.clone(),
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            processed.set(stats.processed.load(Ordering::Relaxed) as i64);
            failed.set(stats.failed.load(Ordering::Relaxed) as i64);
            poisoned.set(stats.poisoned.load(Ordering::Relaxed) as i64);
            if let Ok(depth) = queue.depth().await {
                queue_depth.set(depth);
            }
        }
    });

    HealthState {
        registry: Arc::new(Mutex::new(registry)),
        engine,
    }
}

/// Serve metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    let guard = state.registry.lock().expect("registry lock poisoned");
    match encode(&mut body, &guard) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: aggregates KEK, store, queue, and cache health.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.engine.as_ref() {
        Some(engine) => {
            let report = engine.health_check().await;
            match report.status {
                HealthStatus::Healthy => (StatusCode::OK, "ready".to_string()),
                HealthStatus::Unhealthy => {
                    let mut degraded: Vec<&str> = report
                        .details
                        .iter()
                        .filter(|(key, value)| {
                            key.as_str() != "queue_depth" && *value != "healthy"
                        })
                        .map(|(key, _)| key.as_str())
                        .collect();
                    degraded.sort_unstable();
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        format!("degraded: {}", degraded.join(", ")),
                    )
                }
            }
        }
        // Worker processes carry no engine; liveness is the only signal
        None => (StatusCode::OK, "ready".to_string()),
    }
}
