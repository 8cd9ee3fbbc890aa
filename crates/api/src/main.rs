use std::sync::Arc;

use anyhow::Context;

use juris_api::app::{self, AppServices};
use juris_api::clock::SystemClock;
use juris_api::config::AppConfig;
use juris_infra::{PgStore, Stores};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    juris_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(config = ?config, "starting juris-api");

    let stores = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to the database")?;
            store.migrate().await.context("failed to apply schema")?;
            Stores::from_backend(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (state is lost on exit)");
            Stores::in_memory().0
        }
    };

    let services = Arc::new(
        AppServices::new(config.clone(), stores, Arc::new(SystemClock)).context("failed to build services")?,
    );
    if let Some(bootstrap) = &config.bootstrap_superadmin {
        services
            .bootstrap_superadmin(bootstrap)
            .await
            .context("failed to bootstrap superadmin")?;
    }

    let reaper = services.reaper().spawn(config.reaper_interval);
    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reaper.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
