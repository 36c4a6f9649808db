//! View service entry point.
//!
//! Records listing views behind an abuse filter, serves counts and trending
//! rankings over HTTP, and exports Prometheus metrics.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use view_service::{
    create_router, AbuseConfig, AbuseFilter, AppState, FilterStore, MemoryCache,
    MemoryFilterStore, MemoryViewStore, RedisBackend, RedisCountCache, RedisFilterStore,
    RedisViewStore, ViewCountCache, ViewEvent, ViewServiceConfig, ViewStore, ViewTrackingService,
};

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting view service...");

    // Initialize Prometheus metrics
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9094".into())
        .parse()
        .unwrap_or(9094);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()?;

    info!(
        "Prometheus metrics available at http://0.0.0.0:{}/metrics",
        metrics_port
    );

    // Configuration from environment
    let http_port: u16 = std::env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8084".into())
        .parse()
        .unwrap_or(8084);
    let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "redis".into());
    let track_metadata = env_flag("TRACK_METADATA", true);

    // Wire storage, cache and filter backends
    let (store, cache, filter_store): (
        Arc<dyn ViewStore>,
        Arc<dyn ViewCountCache>,
        Arc<dyn FilterStore>,
    ) = match backend.as_str() {
        "memory" => {
            info!("Using in-memory backend (counts are not durable)");
            (
                Arc::new(MemoryViewStore::with_metadata(track_metadata)),
                Arc::new(MemoryCache::new()),
                Arc::new(MemoryFilterStore::new()),
            )
        }
        _ => {
            let redis_url =
                std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
            info!("Connecting to Redis at {}...", redis_url);
            let redis = RedisBackend::new(&redis_url)?;
            info!("Connected to Redis");
            (
                Arc::new(RedisViewStore::new(redis.clone(), track_metadata)),
                Arc::new(RedisCountCache::new(redis.clone())),
                Arc::new(RedisFilterStore::new(redis)),
            )
        }
    };

    let filter = AbuseFilter::new(filter_store, AbuseConfig::default());
    let service = Arc::new(ViewTrackingService::new(
        store,
        cache,
        filter,
        ViewServiceConfig::default(),
    ));

    // Analytics channel: counted views stream out for downstream consumers.
    // For now the consumer just logs them at debug level.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ViewEvent>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::debug!(
                "view event: {}:{} -> {}",
                event.entity_type,
                event.listing_id,
                event.view_count
            );
        }
        warn!("View event channel closed");
    });

    // Create HTTP server
    let app_state = AppState {
        service,
        events: Some(event_tx),
    };
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port)).await?;
    info!("HTTP API listening on http://0.0.0.0:{}", http_port);
    info!("Available endpoints:");
    info!("  GET  /health                               - Health check");
    info!("  POST /views/increment                      - Record one view");
    info!("  POST /views/bulk                           - Counts for many listings");
    info!("  GET  /views/trending                       - Trending listings");
    info!("  GET  /views/{{entity_type}}/{{listing_id}}     - Count for one listing");

    // ConnectInfo is needed so handlers can see the peer address
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    info!("View service stopped");
    Ok(())
}
