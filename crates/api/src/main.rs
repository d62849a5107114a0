use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use supportsync_api::{
    analysis::{Analyzer, DisabledAnalyzer, HttpAnalyzer},
    config::{LogFormat, StoreBackend},
    routes::create_router,
    store::{ConversationStore, MemoryStore, PgStore},
    AppState, Config, ConversationService,
};
use supportsync_shared::{create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    tracing::info!("SupportSync API v{} starting", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn ConversationStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            let pool = create_pool(database_url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Connected to Postgres store");
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let analyzer: Arc<dyn Analyzer> = match &config.analysis_url {
        Some(url) => {
            tracing::info!(url = %url, "Analysis enabled");
            Arc::new(
                HttpAnalyzer::new(url.clone(), config.analysis_timeout())
                    .context("Failed to build analysis client")?,
            )
        }
        None => {
            tracing::info!("ANALYSIS_URL not set, analysis disabled");
            Arc::new(DisabledAnalyzer)
        }
    };

    let service = ConversationService::new(store, analyzer, config.analysis_timeout());
    let bind_address = config.bind_address.clone();
    let state = AppState::new(service, config);
    let service = Arc::clone(&state.service);

    let app = create_router(state);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    service.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("supportsync_api=info,tower_http=info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
