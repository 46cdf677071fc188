//! # Transform Engine
//!
//! Turns one fetched payload into `dim_date` / `dim_hour` / `dim_component`
//! rows and `fact_value` facts.
//!
//! - Every configured section is its own transaction on the caller's session.
//! - A repeated fact key means the section was already transformed: the
//!   section is rolled back and reported as a duplicate, other sections go on.
//! - The three dimension id sets are shared by all concurrent transforms
//!   behind one `RwLock`. Ids written inside a section are published only
//!   after that section commits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Connection, SqliteConnection};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::entities::{Component, DateDim, HourDim, PriceValue};
use crate::domain::events::EventSink;
use crate::infrastructure::config::TransformConfig;
use crate::infrastructure::price_repository::{DimensionIds, PriceRepository, is_unique_violation};

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum TransformError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Result of one section of one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SectionOutcome {
    Inserted { values: usize },
    /// A fact of this section already existed; nothing from it was kept.
    Duplicate,
    /// The section's entries did not have the expected shape.
    Invalid(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    pub sections: Vec<(String, SectionOutcome)>,
}

impl TransformReport {
    #[must_use]
    pub fn outcome(&self, section: &str) -> Option<&SectionOutcome> {
        self.sections.iter().find(|(name, _)| name == section).map(|(_, o)| o)
    }

    #[must_use]
    pub fn values_inserted(&self) -> usize {
        self.sections
            .iter()
            .map(|(_, outcome)| match outcome {
                SectionOutcome::Inserted { values } => *values,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub transformed: usize,
    pub skipped: usize,
}

/// Dimension ids known to exist in storage.
pub type DimensionCache = DimensionIds;

#[derive(Debug, Clone, PartialEq)]
struct HourEntry {
    date: String,
    hour: u32,
    prices: Vec<(String, f64)>,
}

fn parse_hour(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|h| u32::try_from(h).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Validate a section and keep only components with a known alias.
fn parse_section(entries: &Value, aliases: &HashMap<String, String>) -> Result<Vec<HourEntry>, String> {
    let entries = entries.as_array().ok_or("section is not an array")?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let date = entry
                .get("date")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("entry {i}: missing date"))?;
            let hour = entry
                .get("hour")
                .and_then(parse_hour)
                .ok_or_else(|| format!("entry {i}: missing or invalid hour"))?;
            let components = entry
                .get("priceComponents")
                .and_then(Value::as_array)
                .ok_or_else(|| format!("entry {i}: missing priceComponents"))?;

            let mut prices = Vec::new();
            for component in components {
                let Some(raw_type) = component.get("type").and_then(Value::as_str) else {
                    continue;
                };
                let Some(canonical) = aliases.get(&raw_type.trim().to_lowercase()) else {
                    continue;
                };
                let amount = component
                    .get("priceExcludingVat")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| format!("entry {i}: '{raw_type}' has no numeric priceExcludingVat"))?;
                prices.push((canonical.clone(), amount));
            }

            Ok(HourEntry { date: date.to_string(), hour, prices })
        })
        .collect()
}

pub struct TransformEngine {
    repository: PriceRepository,
    sections: Vec<String>,
    aliases: HashMap<String, String>,
    cache: RwLock<DimensionCache>,
    events: Arc<dyn EventSink>,
}

impl TransformEngine {
    pub fn new(config: &TransformConfig, repository: PriceRepository, events: Arc<dyn EventSink>) -> Self {
        Self {
            repository,
            sections: config.sections.clone(),
            aliases: config.alias_table(),
            cache: RwLock::new(DimensionCache::default()),
            events,
        }
    }

    /// Seed the dimension caches from storage.
    pub async fn init_cache(&self) -> Result<(), TransformError> {
        let ids = self
            .repository
            .dimension_ids()
            .await
            .map_err(|e| TransformError::DatabaseError(format!("Failed to load dimension ids: {e}")))?;
        let message = format!(
            "Cache initialized: {} dates, {} hours, {} components",
            ids.dates.len(),
            ids.hours.len(),
            ids.components.len()
        );
        *self.cache.write().await = ids;
        self.events.log(message);
        Ok(())
    }

    pub async fn cached_counts(&self) -> (usize, usize, usize) {
        let cache = self.cache.read().await;
        (cache.dates.len(), cache.hours.len(), cache.components.len())
    }

    /// Transform one payload for `area_id` on the caller's session.
    ///
    /// # Errors
    /// [`TransformError::MalformedPayload`] when there is no top-level
    /// `energy` object. Section problems are reported in the
    /// [`TransformReport`] instead.
    pub async fn transform(
        &self,
        conn: &mut SqliteConnection,
        area_id: &str,
        payload: &Value,
    ) -> Result<TransformReport, TransformError> {
        let energy = payload
            .get("energy")
            .filter(|e| e.is_object())
            .ok_or_else(|| TransformError::MalformedPayload(format!("Invalid JSON structure for postal area {area_id}")))?;

        let mut report = TransformReport::default();
        for section in &self.sections {
            let Some(entries) = energy.get(section) else {
                continue;
            };
            let outcome = self.transform_section(conn, area_id, section, entries).await;
            report.sections.push((section.clone(), outcome));
        }
        Ok(report)
    }

    async fn transform_section(
        &self,
        conn: &mut SqliteConnection,
        area_id: &str,
        section: &str,
        entries: &Value,
    ) -> SectionOutcome {
        let entries = match parse_section(entries, &self.aliases) {
            Ok(entries) => entries,
            Err(reason) => {
                self.events.log(format!("{area_id} | TRANSFORM {section} | invalid: {reason}"));
                return SectionOutcome::Invalid(reason);
            }
        };

        match self.write_section(conn, area_id, &entries).await {
            Ok((values, fresh)) => {
                self.publish(fresh).await;
                self.events.log(format!("{area_id} | TRANSFORM {section} | success"));
                SectionOutcome::Inserted { values }
            }
            Err(e) if is_unique_violation(&e) => {
                self.events.log(format!("{area_id} | TRANSFORM {section} | Primary key violation"));
                SectionOutcome::Duplicate
            }
            Err(e) => {
                self.events.log_forced(format!("{area_id} | TRANSFORM {section} | Error: {e}"));
                SectionOutcome::Failed(e.to_string())
            }
        }
    }

    /// One transaction; dropped without commit on any error.
    async fn write_section(
        &self,
        conn: &mut SqliteConnection,
        area_id: &str,
        entries: &[HourEntry],
    ) -> Result<(usize, DimensionCache), sqlx::Error> {
        let mut tx = conn.begin().await?;
        let mut fresh = DimensionCache::default();
        let mut values = 0;

        for entry in entries {
            let date = DateDim::new(&entry.date);
            if !fresh.dates.contains(&date.id) && !self.cache.read().await.dates.contains(&date.id) {
                PriceRepository::insert_date(&mut tx, &date).await?;
                fresh.dates.insert(date.id.clone());
            }

            let hour = HourDim::new(entry.hour);
            if !fresh.hours.contains(&hour.id) && !self.cache.read().await.hours.contains(&hour.id) {
                PriceRepository::insert_hour(&mut tx, &hour).await?;
                fresh.hours.insert(hour.id.clone());
            }

            for (name, amount) in &entry.prices {
                let component = Component::new(name);
                if !fresh.components.contains(&component.id)
                    && !self.cache.read().await.components.contains(&component.id)
                {
                    PriceRepository::insert_component(&mut tx, &component).await?;
                    fresh.components.insert(component.id.clone());
                }

                let value = PriceValue {
                    postal_area_id: area_id.to_string(),
                    date_id: date.id.clone(),
                    hour_id: hour.id.clone(),
                    component_id: component.id,
                    amount: *amount,
                };
                PriceRepository::insert_value(&mut tx, &value).await?;
                values += 1;
            }
        }

        tx.commit().await?;
        Ok((values, fresh))
    }

    async fn publish(&self, fresh: DimensionCache) {
        if fresh.dates.is_empty() && fresh.hours.is_empty() && fresh.components.is_empty() {
            return;
        }
        let mut cache = self.cache.write().await;
        cache.dates.extend(fresh.dates);
        cache.hours.extend(fresh.hours);
        cache.components.extend(fresh.components);
    }

    /// Re-run the transform over every stored payload.
    ///
    /// Unreadable payloads are skipped. Progress is logged every 10 areas.
    pub async fn transform_all(&self) -> Result<BatchReport, TransformError> {
        self.init_cache().await?;

        let payloads = self
            .repository
            .stored_payloads()
            .await
            .map_err(|e| TransformError::DatabaseError(format!("Failed to read stored payloads: {e}")))?;

        let mut report = BatchReport { total: payloads.len(), ..BatchReport::default() };
        if payloads.is_empty() {
            self.events.log_forced("Nothing can be done!".to_string());
            return Ok(report);
        }
        self.events.log_forced(format!("Found {} rows!", report.total));

        let mut conn = self
            .repository
            .pool()
            .acquire()
            .await
            .map_err(|e| TransformError::DatabaseError(format!("Failed to acquire connection: {e}")))?;

        for (index, (area_id, raw)) in payloads.iter().enumerate() {
            let index = index + 1;
            let result = match serde_json::from_str::<Value>(raw) {
                Ok(payload) => self.transform(&mut conn, area_id, &payload).await,
                Err(e) => Err(TransformError::MalformedPayload(e.to_string())),
            };
            match result {
                Ok(_) => report.transformed += 1,
                Err(e) => {
                    report.skipped += 1;
                    self.events.log(format!("Error processing postal area {area_id}: {e}"));
                }
            }

            if index % 10 == 0 || index == report.total {
                self.events.log_forced(format!("{index}/{} | New Tabular Data: {}", report.total, report.transformed));
            }
        }

        self.events.log_forced("Data transformation completed!".to_string());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aliases() -> HashMap<String, String> {
        HashMap::from([("alias1".to_string(), "Energy".to_string())])
    }

    #[test]
    fn parse_skips_unmapped_components() {
        let section = json!([{
            "date": "2024-01-01",
            "hour": "7",
            "priceComponents": [
                {"type": "ALIAS1", "priceExcludingVat": 1.5},
                {"type": "unknown"}
            ]
        }]);
        let entries = parse_section(&section, &aliases()).unwrap();
        assert_eq!(
            entries,
            vec![HourEntry { date: "2024-01-01".into(), hour: 7, prices: vec![("Energy".into(), 1.5)] }]
        );
    }

    #[test]
    fn parse_rejects_broken_entries() {
        assert!(parse_section(&json!({"not": "a list"}), &aliases()).is_err());
        assert!(parse_section(&json!([{"hour": 1, "priceComponents": []}]), &aliases()).is_err());
        let bad_amount = json!([{"date": "d", "hour": 1, "priceComponents": [{"type": "alias1", "priceExcludingVat": "x"}]}]);
        assert!(parse_section(&bad_amount, &aliases()).is_err());
    }
}
