use std::net::SocketAddr;
use std::sync::Arc;

use temperature_api::cache::{CacheAsideStore, RedisCacheClient};
use temperature_api::config::Config;
use temperature_api::db::{self, PgDeviceStore, PgIdentityResolver, PgReadingStore};
use temperature_api::metrics;
use temperature_api::query::QueryEngine;
use temperature_api::rate_limit::{self, RateLimiter};
use temperature_api::rest::{self, AppState};
use temperature_api::write::WriteCoordinator;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting temperature API");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.database_host());
    info!("Cache: {} (timeout {:?})", config.redis_url, config.cache_timeout);

    metrics::init_metrics();

    let pool = match db::make_pool(&config.database_url, config.db_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    // Redis is connected lazily; a bad URL is the only start-up failure.
    let cache_client = match RedisCacheClient::new(&config.redis_url, config.cache_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Invalid cache configuration: {}", e);
            std::process::exit(1);
        }
    };
    let cache = CacheAsideStore::new(Arc::new(cache_client));

    let readings = Arc::new(PgReadingStore::new(pool.clone()));
    let devices = Arc::new(PgDeviceStore::new(pool.clone()));
    let identities = Arc::new(PgIdentityResolver::new(pool));

    let state = AppState {
        queries: Arc::new(QueryEngine::new(readings.clone(), cache.clone())),
        writes: Arc::new(WriteCoordinator::new(readings, devices.clone(), cache)),
        devices,
    };

    let limiter = Arc::new(RateLimiter::new());
    let sweeper_handle = tokio::spawn(rate_limit::run_sweeper(
        limiter.clone(),
        config.rate_limit_sweep,
    ));

    let app = rest::create_router(state, identities, limiter);

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = sweeper_handle => {
            error!("Rate-limit sweeper terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}
