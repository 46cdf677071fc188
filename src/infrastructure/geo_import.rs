//! # Geography import
//!
//! Loads country → province → city → postal area rows from a per-country CSV.
//! All ids are content hashes and inserts ignore existing keys, so importing
//! the same file twice adds nothing the second time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::entities::{City, Country, PostalArea, Province};
use crate::domain::events::EventSink;
use crate::infrastructure::config::CountryConfig;
use crate::infrastructure::price_repository::PriceRepository;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum GeoImportError {
    #[error("No CSV source configured for {0}")]
    NoSource(String),
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("CSV error: {0}")]
    Csv(String),
    #[error("Column '{0}' not found in CSV header")]
    MissingColumn(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Rows added by one import. Zero everywhere on a repeated import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub countries: usize,
    pub provinces: usize,
    pub cities: usize,
    pub postal_areas: usize,
}

#[async_trait]
pub trait GeoImporter: Send + Sync {
    async fn import_country(&self, country: &CountryConfig) -> Result<ImportSummary, GeoImportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GeoRow {
    province: String,
    city: String,
    postal: String,
    label: Option<String>,
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, GeoImportError> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| GeoImportError::MissingColumn(name.to_string()))
}

fn non_empty(record: &csv::StringRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Rows with a missing province, city or postal code are dropped.
fn parse_rows(bytes: &[u8], country: &CountryConfig) -> Result<Vec<GeoRow>, GeoImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(country.separator_byte())
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers().map_err(|e| GeoImportError::Csv(e.to_string()))?.clone();
    let province = column_index(&headers, &country.columns.province)?;
    let city = column_index(&headers, &country.columns.city)?;
    let postal = column_index(&headers, &country.columns.postal)?;
    // an absent label column is not an error
    let label = country
        .columns
        .label
        .as_deref()
        .and_then(|name| column_index(&headers, name).ok());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| GeoImportError::Csv(e.to_string()))?;
        let (Some(province), Some(city), Some(postal)) =
            (non_empty(&record, province), non_empty(&record, city), non_empty(&record, postal))
        else {
            continue;
        };
        rows.push(GeoRow {
            province,
            city,
            postal,
            label: label.and_then(|i| non_empty(&record, i)),
        });
    }
    Ok(rows)
}

pub struct CsvGeoImporter {
    pool: SqlitePool,
    events: Arc<dyn EventSink>,
}

impl CsvGeoImporter {
    pub fn new(pool: SqlitePool, events: Arc<dyn EventSink>) -> Self {
        Self { pool, events }
    }

    async fn persist(&self, country: &CountryConfig, rows: &[GeoRow]) -> Result<ImportSummary, sqlx::Error> {
        let name = country.name.as_str();
        let mut summary = ImportSummary::default();
        let mut tx = self.pool.begin().await?;

        self.events.log_forced(format!("0% [Country] {name}"));
        if PriceRepository::insert_country(&mut tx, &Country::new(name, country.vat, &country.currency)).await? {
            summary.countries += 1;
        }

        self.events.log_forced(format!("25% [Province] {name}"));
        let mut seen = HashSet::new();
        for row in rows {
            let province = Province::new(name, &row.province);
            if seen.insert(province.id.clone()) && PriceRepository::insert_province(&mut tx, &province).await? {
                summary.provinces += 1;
            }
        }

        self.events.log_forced(format!("50% [City] {name}"));
        seen.clear();
        for row in rows {
            let city = City::new(name, &row.province, &row.city);
            if seen.insert(city.id.clone()) && PriceRepository::insert_city(&mut tx, &city).await? {
                summary.cities += 1;
            }
        }

        self.events.log_forced(format!("75% [Postal Area] {name}"));
        seen.clear();
        for row in rows {
            let area = PostalArea::new(name, &row.province, &row.city, &row.postal, row.label.as_deref());
            if seen.insert(area.id.clone()) && PriceRepository::insert_postal_area(&mut tx, &area).await? {
                summary.postal_areas += 1;
            }
        }

        tx.commit().await?;
        Ok(summary)
    }
}

#[async_trait]
impl GeoImporter for CsvGeoImporter {
    async fn import_country(&self, country: &CountryConfig) -> Result<ImportSummary, GeoImportError> {
        let path = country
            .csv_path
            .as_ref()
            .ok_or_else(|| GeoImportError::NoSource(country.name.clone()))?;
        let bytes = tokio::fs::read(path).await.map_err(|e| GeoImportError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let rows = parse_rows(&bytes, country)?;
        let summary = self
            .persist(country, &rows)
            .await
            .map_err(|e| GeoImportError::DatabaseError(format!("Failed to import {}: {e}", country.name)))?;

        self.events.log_forced(format!("100% [Done] {}", country.name));
        self.events.log_forced(format!(
            "Import summary for {}: provinces added {}, cities added {}, postal areas added {}",
            country.name, summary.provinces, summary.cities, summary.postal_areas
        ));
        Ok(summary)
    }
}
