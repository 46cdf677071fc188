//! Test utilities
//!
//! Every [`TestDatabase`] is a fresh SQLite file under the system temp
//! directory, migrated and removed again on drop, so tests never share state.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::entities::{City, Country, PostalArea, Province};
use crate::domain::events::{BotEvent, Dispatch, EventSink, EventTarget};
use crate::infrastructure::config::DatabaseConfig;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::http_client::{FetchError, FetchResponse, PageFetcher};
use crate::infrastructure::price_repository::PriceRepository;

pub struct TestDatabase {
    pub connection: DatabaseConnection,
    path: PathBuf,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("energy-crawler-test-{}.db", Uuid::new_v4()));
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            max_connections: 12,
            ..DatabaseConfig::default()
        };
        let connection = DatabaseConnection::new(&config).await?;
        connection.migrate().await?;
        Ok(Self { connection, path })
    }

    pub fn pool(&self) -> SqlitePool {
        self.connection.pool().clone()
    }

    pub fn repository(&self) -> PriceRepository {
        PriceRepository::new(self.pool())
    }

    /// Insert the country → province → city chain and one pending area.
    pub async fn seed_area(&self, country: &str, code: &str) -> Result<PostalArea> {
        let mut conn = self.connection.pool().acquire().await?;
        PriceRepository::insert_country(&mut conn, &Country::new(country, 0.21, "EUR")).await?;
        PriceRepository::insert_province(&mut conn, &Province::new(country, "Central")).await?;
        PriceRepository::insert_city(&mut conn, &City::new(country, "Central", "Capital")).await?;
        let area = PostalArea::new(country, "Central", "Capital", code, None);
        PriceRepository::insert_postal_area(&mut conn, &area).await?;
        Ok(area)
    }

    /// Raw `(status, payload)` of an area.
    pub async fn area_state(&self, id: &str) -> Result<(Option<i64>, Option<String>)> {
        let row: (Option<i64>, Option<String>) =
            sqlx::query_as("SELECT pa_status_code, pa_data FROM postal_areas WHERE pa_id = ?")
                .bind(id)
                .fetch_one(self.connection.pool())
                .await?;
        Ok(row)
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Event sink that records everything it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Dispatch>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Dispatch> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|d| match d.event {
                BotEvent::Log { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn contains_log(&self, needle: &str) -> bool {
        self.log_messages().iter().any(|m| m.contains(needle))
    }
}

impl EventSink for RecordingSink {
    fn emit_to(&self, target: EventTarget, event: BotEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(Dispatch { target, event });
        }
    }
}

/// Fetcher answering every URL with the same response, recording the URLs.
#[derive(Debug)]
pub struct StubFetcher {
    status: u16,
    body: String,
    delay: Duration,
    body_error: bool,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into(), delay: Duration::ZERO, body_error: false, calls: Mutex::new(Vec::new()) }
    }

    /// Answer with the status line, then fail while reading the body.
    #[must_use]
    pub const fn with_body_error(mut self) -> Self {
        self.body_error = true;
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.body_error {
            return Err(FetchError::Body { status: self.status, message: "connection reset mid-body".to_string() });
        }
        Ok(FetchResponse { status: self.status, body: self.body.clone() })
    }
}
