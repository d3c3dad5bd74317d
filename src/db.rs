//! SQLite bootstrap: connection pool and schema migrations.

use anyhow::Result;
use sqlx::{SqlitePool, migrate::Migrator, sqlite::SqlitePoolOptions};
use std::path::Path;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open the pool, creating the database file and its directory if needed.
pub async fn connect(db_url: &str) -> Result<SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");

    if !db_path.starts_with(":memory:") {
        let db_path_obj = Path::new(db_path);
        if let Some(parent) = db_path_obj.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        // SQLx does not create missing database files by default.
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_path)
        {
            Ok(_) => tracing::debug!("Database file {} is present", db_path),
            Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;
    Ok(pool)
}

/// Apply the embedded migrations. Already-applied versions are skipped.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    tracing::info!("Running {} migrations...", MIGRATOR.iter().count());
    MIGRATOR.run(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = test_pool().await;
        super::run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&*pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["entity_images", "image_assets", "pending_uploads"]);

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(&*pool)
            .await
            .unwrap();
        assert_eq!(applied, 1);
    }
}
