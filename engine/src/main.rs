//! Station Sync - keeps a local cache in step with a remote download station

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use station_sync::api::{Gateway, HttpGateway};
use station_sync::config;
use station_sync::db::Cache;
use station_sync::server;
use station_sync::session::{DsAuthenticator, FileSecretStore, SessionState};
use station_sync::sync::SyncEngine;
use station_sync::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = config::load_or_create_default()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting Station Sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {:?}", config::config_path());

    let cache = Cache::open(settings.cache_path())?;
    info!("Cache opened at {:?}", settings.cache_path());

    let store = Arc::new(FileSecretStore::new(settings.secrets_path()));
    let authenticator = Arc::new(DsAuthenticator::new(&settings.station)?);
    let session = Arc::new(SessionState::new(authenticator, store, cache.clone()));

    let gateway: Arc<dyn Gateway> =
        Arc::new(HttpGateway::new(&settings.station, Arc::clone(&session))?);
    let engine = SyncEngine::new(
        Arc::clone(&session),
        gateway,
        cache,
        settings.refresh.clone(),
    );

    match session.restore().await {
        Ok(true) => info!("Previous session restored"),
        Ok(false) => info!("No usable session, waiting for login"),
        Err(e) => warn!("Session restore failed: {}", e),
    }

    let state = Arc::new(AppState::new(settings, engine));
    server::run(state).await
}
