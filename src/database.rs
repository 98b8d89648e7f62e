use crate::config::DatabaseConfig;
use crate::error::FieldResult;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Database manager for the field store
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if needed) the database and optionally run migrations
    pub async fn new(config: &DatabaseConfig) -> FieldResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        // SQLite creates the file but not its directory
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
            }
        }

        info!(url = %config.url, "Connecting to field database");
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let manager = Self { pool };
        if config.auto_migrate {
            manager.migrate().await?;
        }

        Ok(manager)
    }

    /// Open a database file inside `dir` with default settings
    pub async fn in_directory(dir: &std::path::Path) -> FieldResult<Self> {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.join("field.db").display()),
            ..DatabaseConfig::default()
        };
        Self::new(&config).await
    }

    pub async fn migrate(&self) -> FieldResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

/// Timestamps are stored as epoch milliseconds
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Sets are stored as JSON text arrays
pub(crate) fn encode_set(values: &std::collections::BTreeSet<String>) -> FieldResult<String> {
    Ok(serde_json::to_string(values)?)
}

pub(crate) fn decode_set(raw: &str) -> FieldResult<std::collections::BTreeSet<String>> {
    Ok(serde_json::from_str(raw)?)
}
