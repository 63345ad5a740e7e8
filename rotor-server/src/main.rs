//! # Rotor Server
//!
//! Admin panel backend that periodically rotates the public port and
//! fronting domain of managed proxy endpoint records. The JSON API exposes
//! the rotation engine's operations: on-demand rotation, domain pool
//! management, and runtime settings. A background sweeper rotates every due
//! record on a fixed cadence.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rotor_core::{PostgresRotationStore, SharedSettings, Sweeper};
use rotor_server::{config::Config, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    let settings = SharedSettings::new(config.rotation_settings()?);

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .context("connecting to PostgreSQL")?;
    info!("connected to PostgreSQL");

    PostgresRotationStore::ensure_schema(&pool)
        .await
        .context("evolving rotation schema")?;
    PostgresRotationStore::reconcile_pool(&pool, Utc::now().timestamp())
        .await
        .context("reconciling domain pool usage")?;

    let store = Arc::new(PostgresRotationStore::new(pool));
    let state = AppState::new(store, settings);

    let sweeper = Sweeper::new(state.rotator.clone());
    tokio::spawn(sweeper.run(config.sweep_period));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "rotor server listening");

    axum::serve(listener, routes::router(state))
        .await
        .context("serving HTTP")?;

    Ok(())
}
