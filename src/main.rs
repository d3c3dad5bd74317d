use anyhow::{Context, Result};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod extractors;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use services::{
    asset_store::AssetStore, coordinator::Coordinator, pending_store::PendingStore,
    slots::SqliteImageSlots, sweeper::run_pending_sweeper,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting moderated-assets with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // Schema statements are idempotent, so they also run on every start.
    db::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize stores and the coordinator ---
    let pending_ttl =
        chrono::Duration::from_std(cfg.pending_ttl).context("pending TTL out of range")?;
    let assets = AssetStore::new(db.clone(), cfg.storage_dir.clone());
    let pending = PendingStore::new(db.clone(), pending_ttl);
    let slots = Arc::new(SqliteImageSlots::new(db.clone()));
    let moderation = Arc::new(cfg.moderation_mode.engine());
    tracing::info!(mode = ?cfg.moderation_mode, "Moderation engine ready");

    let coordinator = Coordinator::new(
        assets,
        pending.clone(),
        slots,
        moderation,
        cfg.limits,
        cfg.operation_timeout,
    );

    if let Some(every) = cfg.sweep_interval {
        tokio::spawn(run_pending_sweeper(pending, every));
    }

    // --- Build router ---
    let app = routes::routes::app(coordinator);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
