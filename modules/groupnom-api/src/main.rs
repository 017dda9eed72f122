use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use groupnom_api::{build_router, AppState};
use groupnom_common::{Clock, Config, SystemClock};
use groupnom_selection::{
    read_json_file, CandidateSelector, Catalog, ChainCache, ChainNameSource, ExposureCounter,
    MemoryCatalog, OutcomeRecorder, PgCatalog,
};
use groupnom_session::{MemorySessionStore, PgSessionStore, SessionService, SessionStore};

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Everything the services need from storage, behind trait objects so the
/// Postgres and in-memory backends wire up the same way.
struct Backends {
    catalog: Arc<dyn Catalog>,
    exposure: Arc<dyn ExposureCounter>,
    outcomes: Arc<dyn OutcomeRecorder>,
    chains: Arc<dyn ChainNameSource>,
    store: Arc<dyn SessionStore>,
}

async fn postgres_backends(
    url: &str,
    config: &Config,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
) -> Result<Backends> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("Failed to connect to Postgres")?;

    let catalog = Arc::new(PgCatalog::new(pool.clone()));
    catalog.migrate().await?;
    let store = PgSessionStore::new(pool, clock, ttl);
    store.migrate().await?;

    if let Some(path) = &config.catalog_path {
        let restaurants = read_json_file(path)?;
        for restaurant in &restaurants {
            catalog.upsert(restaurant).await?;
        }
        info!(path = %path, count = restaurants.len(), "Imported restaurants into Postgres");
    }

    Ok(Backends {
        catalog: catalog.clone(),
        exposure: catalog.clone(),
        outcomes: catalog.clone(),
        chains: catalog,
        store: Arc::new(store),
    })
}

fn memory_backends(config: &Config, clock: Arc<dyn Clock>, ttl: chrono::Duration) -> Result<Backends> {
    let catalog = match &config.catalog_path {
        Some(path) => Arc::new(MemoryCatalog::from_json_file(path)?),
        None => {
            warn!("No DATABASE_URL or CATALOG_PATH set, starting with an empty catalog");
            Arc::new(MemoryCatalog::new(Vec::new()))
        }
    };

    Ok(Backends {
        catalog: catalog.clone(),
        exposure: catalog.clone(),
        outcomes: catalog.clone(),
        chains: catalog,
        store: Arc::new(MemorySessionStore::new(clock, ttl)),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("groupnom=info".parse()?))
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ttl = chrono::Duration::from_std(config.session_ttl).context("SESSION_TTL_HOURS out of range")?;

    let backends = match &config.database_url {
        Some(url) => postgres_backends(url, &config, clock.clone(), ttl).await?,
        None => memory_backends(&config, clock.clone(), ttl)?,
    };

    let chain_cache = Arc::new(ChainCache::new(
        backends.chains,
        clock.clone(),
        config.chain_cache_ttl,
    ));
    let selector = CandidateSelector::new(backends.catalog)
        .with_exposure_counter(backends.exposure)
        .with_chain_cache(chain_cache)
        .with_fallback_limit(config.fallback_candidate_limit);

    let sessions = SessionService::new(backends.store, Arc::new(selector), clock)
        .configured(&config)
        .with_outcome_recorder(backends.outcomes);
    let state = Arc::new(AppState::new(sessions));

    // Expired-session sweep
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.sessions.purge_expired().await {
                warn!(error = %e, "Expired session sweep failed");
            }
        }
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("Groupnom API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
