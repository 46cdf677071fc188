// Database connection and pool management
// SQLite through sqlx; the schema is bootstrapped with CREATE TABLE IF NOT EXISTS

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::config::DatabaseConfig;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS countries (
        c_id TEXT PRIMARY KEY,
        c_name TEXT NOT NULL,
        c_vat REAL NOT NULL DEFAULT 0,
        c_currency TEXT NOT NULL DEFAULT ''
    )",
    r"
    CREATE TABLE IF NOT EXISTS provinces (
        p_id TEXT PRIMARY KEY,
        p_name TEXT NOT NULL,
        c_id TEXT NOT NULL REFERENCES countries (c_id) ON DELETE CASCADE
    )",
    r"
    CREATE TABLE IF NOT EXISTS cities (
        ci_id TEXT PRIMARY KEY,
        ci_name TEXT NOT NULL,
        p_id TEXT NOT NULL REFERENCES provinces (p_id) ON DELETE CASCADE
    )",
    r"
    CREATE TABLE IF NOT EXISTS postal_areas (
        pa_id TEXT PRIMARY KEY,
        pa_code TEXT NOT NULL,
        pa_name TEXT,
        pa_status_code INTEGER,
        pa_data TEXT,
        ci_id TEXT NOT NULL REFERENCES cities (ci_id) ON DELETE CASCADE
    )",
    r"
    CREATE TABLE IF NOT EXISTS dim_date (
        d_id TEXT PRIMARY KEY,
        d_date TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS dim_hour (
        h_id TEXT PRIMARY KEY,
        h_hour INTEGER NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS dim_component (
        co_id TEXT PRIMARY KEY,
        co_name TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS fact_value (
        pa_id TEXT NOT NULL REFERENCES postal_areas (pa_id) ON DELETE CASCADE,
        d_id TEXT NOT NULL REFERENCES dim_date (d_id),
        h_id TEXT NOT NULL REFERENCES dim_hour (h_id),
        co_id TEXT NOT NULL REFERENCES dim_component (co_id),
        v_value REAL NOT NULL,
        PRIMARY KEY (pa_id, d_id, h_id, co_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_postal_areas_city ON postal_areas (ci_id)",
    "CREATE INDEX IF NOT EXISTS idx_postal_areas_status ON postal_areas (pa_status_code)",
    "CREATE INDEX IF NOT EXISTS idx_cities_province ON cities (p_id)",
    "CREATE INDEX IF NOT EXISTS idx_provinces_country ON provinces (c_id)",
];

#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let db_path = config
            .url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let db_path = db_path.split('?').next().unwrap_or(db_path);

        if !db_path.is_empty() && !db_path.contains(":memory:") {
            if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {}", config.url))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
