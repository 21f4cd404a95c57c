//! Browser automation orchestrator server entry point.
//!
//! Bootstraps the credential vault, safety-layer stores, shared state, and
//! browser pool, then starts the dispatch workers, the delayed-queue
//! promoter, and the Axum HTTP server with graceful shutdown. Wiring order
//! follows the dependency chain: vault, then the safety layer (rate
//! limiter, circuit breaker), then state, then the browser pool, then the
//! orchestrator's background workers, then the HTTP API.

mod config;
mod error;
mod middleware;
mod orchestrator;
mod routes;
mod state;
mod workflows;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::info;

use orc_browser::{ArtifactCapturer, BrowserPool, CookieCache, PoolConfig};
use orc_core::CircuitBreaker;
use orc_core::CredentialVault;
use orc_queue::{PriorityQueue, RedisCircuitBreakerStore, RedisIdempotencyStore, RedisKeystoreStore};
use orc_storage::{MemoryBackend, StorageBackend};
#[cfg(feature = "postgres-backend")]
use orc_storage::PostgresBackend;

use config::{ServerConfig, StorageBackendType};
use middleware::{api_key_middleware, rate_limit_middleware};
use state::AppState;

use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Cookie cache entry lifetime for authenticated sessions held by the
/// executor across jobs on the same domain.
const COOKIE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, workers = config.worker_count, "orchestrator starting");

    let state = build_app_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_handles = Vec::with_capacity(config.worker_count);
    for consumer_id in 0..config.worker_count {
        let worker_state = Arc::clone(&state);
        let rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(async move {
            orchestrator::run_dispatch_worker(worker_state, consumer_id, rx).await;
        }));
    }

    let promoter_handle = {
        let promoter_state = Arc::clone(&state);
        let rx = shutdown_rx.clone();
        let interval = Duration::from_secs(config.delayed_scan_interval_secs);
        tokio::spawn(async move {
            orchestrator::run_delayed_promoter(promoter_state, interval, rx).await;
        })
    };

    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background workers to stop");
    for handle in worker_handles {
        let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(10), promoter_handle).await;
    state.pool.shutdown().await;

    info!("orchestrator stopped");
    Ok(())
}

async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!("using PostgreSQL storage");
            Arc::new(PostgresBackend::connect(url).await.context("failed to connect to PostgreSQL storage")?)
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!("PostgreSQL backend requested but feature 'postgres-backend' is not enabled");
        }
    };

    let redis_conn = orc_queue::connect(&config.redis_url).await.context("failed to connect to Redis")?;

    let queue = PriorityQueue::new(redis_conn.clone(), "orc-server");
    let circuit_store = RedisCircuitBreakerStore::new(redis_conn.clone(), "circuit");
    let idempotency_store = RedisIdempotencyStore::new(redis_conn.clone(), "idempotency");

    let keystore = RedisKeystoreStore::new(redis_conn.clone(), "vault");
    let vault = Arc::new(CredentialVault::new(None).with_keystore(Arc::new(keystore)));
    let circuit_breaker = CircuitBreaker::default();

    let pool_config = PoolConfig::default();
    let pool = BrowserPool::new(pool_config);

    let cookies = Arc::new(CookieCache::new(COOKIE_CACHE_TTL));
    let artifacts = ArtifactCapturer::new(config.artifacts_root.clone());
    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build().context("failed to build HTTP client")?;

    Ok(Arc::new(AppState {
        storage,
        queue,
        redis_conn,
        circuit_store,
        idempotency_store,
        circuit_breaker,
        vault,
        pool,
        cookies,
        artifacts,
        http_client,
        cancellations: Arc::new(Mutex::new(HashSet::new())),
        config: config.clone(),
    }))
}

fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = routes::api_router()
        .route_layer(axum_mw::from_fn_with_state(Arc::clone(&state), rate_limit_middleware))
        .route_layer(axum_mw::from_fn_with_state(Arc::clone(&state), api_key_middleware));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::HeaderName::from_static("x-api-key")]);

    Router::new()
        .merge(routes::health_router())
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(axum::http::header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")))
        .layer(SetResponseHeaderLayer::overriding(axum::http::header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")))
        .with_state(state)
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
