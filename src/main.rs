//! Weatherline: location-based weather service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the configured store, wires providers, caches and the summary
//! generator together, and serves the HTTP API until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use weatherline::api::{self, ApiState};
use weatherline::cache::{AiSummaryCache, ConditionCategories, WeatherCache};
use weatherline::clock::{Clock, SystemClock};
use weatherline::config::{AppConfig, StorageBackend};
use weatherline::engine::FetchOrchestrator;
use weatherline::geo::{catalog, GeoResolver};
use weatherline::history::HistoryRecorder;
use weatherline::llm::openrouter::OpenRouterGenerator;
use weatherline::llm::SummaryGenerator;
use weatherline::providers::open_meteo::OpenMeteoProvider;
use weatherline::providers::weatherapi::{self, WeatherApiProvider};
use weatherline::providers::{GatewayConfig, ProviderGateway, WeatherProvider};
use weatherline::storage::memory::MemoryStore;
use weatherline::storage::sqlite::SqliteStore;
use weatherline::storage::{ApiKeyStore, HistoryStore, SummaryStore, WeatherCacheStore};

/// The four store namespaces, possibly backed by one object.
struct Stores {
    weather: Arc<dyn WeatherCacheStore>,
    history: Arc<dyn HistoryStore>,
    summaries: Arc<dyn SummaryStore>,
    api_keys: Arc<dyn ApiKeyStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("WEATHERLINE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        config = %config_path,
        bind = %cfg.server.bind,
        cache_ttl_secs = cfg.weather.cache_ttl_secs,
        backend = ?cfg.storage.backend,
        "Weatherline starting up"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // -- Storage ---------------------------------------------------------

    let stores = open_stores(&cfg).await?;

    // -- Location catalog ------------------------------------------------

    let locations = catalog::load(cfg.locations.catalog_file.as_deref())?;
    info!(count = locations.len(), "Location catalog loaded");
    let geo = Arc::new(GeoResolver::new(locations, cfg.weather.resolution_radius_km));

    // -- Providers -------------------------------------------------------

    let timeout = Duration::from_secs(cfg.weather.request_timeout_secs);
    let premium: Arc<dyn WeatherProvider> =
        Arc::new(WeatherApiProvider::new(&cfg.weather.premium_base_url, timeout)?);
    let free: Arc<dyn WeatherProvider> =
        Arc::new(OpenMeteoProvider::new(&cfg.weather.free_base_url, timeout)?);

    let gateway = ProviderGateway::new(
        Some(premium),
        free,
        stores.api_keys.clone(),
        clock.clone(),
        GatewayConfig {
            request_timeout: timeout,
            rate_limit_cooldown: Duration::from_secs(cfg.weather.rate_limit_cooldown_secs),
        },
    );

    // -- Engine ----------------------------------------------------------

    let cache = WeatherCache::new(stores.weather.clone(), cfg.cache_ttl(), clock.clone());
    let history = HistoryRecorder::new(stores.history.clone(), clock.clone());
    let orchestrator = Arc::new(FetchOrchestrator::new(
        cfg.weather.bounding_box,
        geo,
        cache.clone(),
        Arc::new(gateway),
        history.clone(),
    ));

    // -- AI summaries ----------------------------------------------------

    let generator: Option<Arc<dyn SummaryGenerator>> = match AppConfig::resolve_secret(&cfg.ai.api_key_env) {
        Some(key) => {
            info!(model = %cfg.ai.model, "Using OpenRouter summary generator");
            let openrouter = OpenRouterGenerator::new(
                key,
                Some(cfg.ai.base_url.clone()),
                Some(cfg.ai.model.clone()),
                Some(cfg.ai.max_tokens),
                Duration::from_secs(cfg.ai.request_timeout_secs),
            )?;
            Some(Arc::new(openrouter) as Arc<dyn SummaryGenerator>)
        }
        None => {
            warn!(env = %cfg.ai.api_key_env, "No AI API key configured, summaries use the template");
            None
        }
    };

    let summaries = Arc::new(AiSummaryCache::new(
        stores.summaries.clone(),
        generator,
        ConditionCategories::from_table(&cfg.ai.condition_categories),
        cfg.ai.temp_delta_threshold,
        clock.clone(),
    ));

    // -- Background purge ------------------------------------------------

    spawn_purge_task(
        cache,
        history,
        cfg.history_retention(),
        Duration::from_secs(cfg.storage.purge_interval_secs.max(1)),
    );

    // -- HTTP ------------------------------------------------------------

    let app = api::build_router(Arc::new(ApiState {
        orchestrator,
        summaries,
    }));

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind))?;
    info!(bind = %cfg.server.bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Weatherline stopped");
    Ok(())
}

/// Open the configured backend and seed the premium key from the environment.
async fn open_stores(cfg: &AppConfig) -> Result<Stores> {
    let premium_key = AppConfig::resolve_secret(&cfg.weather.premium_api_key_env);
    if premium_key.is_none() {
        warn!(
            env = %cfg.weather.premium_api_key_env,
            "No premium weather API key in the environment, relying on stored keys or free provider"
        );
    }

    match cfg.storage.backend {
        StorageBackend::Memory => {
            let ttl = Duration::from_secs(cfg.weather.cache_ttl_secs);
            let mut store = MemoryStore::new(cfg.storage.cache_capacity, ttl);
            if let Some(key) = premium_key {
                store = store.with_api_key(weatherapi::PROVIDER_NAME, key).await;
            }
            let store = Arc::new(store);
            info!(capacity = cfg.storage.cache_capacity, "Using in-memory store");
            Ok(Stores {
                weather: store.clone(),
                history: store.clone(),
                summaries: store.clone(),
                api_keys: store,
            })
        }
        StorageBackend::Sqlite => {
            let store = SqliteStore::connect(&cfg.storage.database_url)
                .await
                .with_context(|| format!("Failed to open database {}", cfg.storage.database_url))?;
            if let Some(key) = premium_key {
                ApiKeyStore::put(&store, weatherapi::PROVIDER_NAME, key)
                    .await
                    .context("Failed to store premium API key")?;
            }
            let store = Arc::new(store);
            info!(url = %cfg.storage.database_url, "Using SQLite store");
            Ok(Stores {
                weather: store.clone(),
                history: store.clone(),
                summaries: store.clone(),
                api_keys: store,
            })
        }
    }
}

/// Periodically drop expired cache rows and history past retention.
fn spawn_purge_task(
    cache: WeatherCache,
    history: HistoryRecorder,
    retention: chrono::Duration,
    every: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match cache.purge_expired().await {
                Ok(n) if n > 0 => info!(removed = n, "Purged expired weather cache entries"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Weather cache purge failed"),
            }
            match history.purge_older_than(retention).await {
                Ok(n) if n > 0 => info!(removed = n, "Purged old history records"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "History purge failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, stopping"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("weatherline=info,tower_http=info"));

    let json_logging = std::env::var("WEATHERLINE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
