//! Repository for the geography and star-schema tables
//!
//! Pool-level reads run on the shared pool. Everything a worker does inside its
//! own session or transaction takes an explicit `&mut SqliteConnection`.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashSet;

use crate::domain::entities::{City, Component, Country, DateDim, HourDim, PostalArea, PriceValue, Province};
use crate::domain::ids;

pub type RepoResult<T> = Result<T, sqlx::Error>;

/// `true` when a statement failed on a PRIMARY KEY / UNIQUE constraint.
#[must_use]
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Tables addressable by [`PriceRepository::count_rows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Countries,
    Provinces,
    Cities,
    PostalAreas,
    Dates,
    Hours,
    Components,
    Values,
}

impl Table {
    const fn name(self) -> &'static str {
        match self {
            Self::Countries => "countries",
            Self::Provinces => "provinces",
            Self::Cities => "cities",
            Self::PostalAreas => "postal_areas",
            Self::Dates => "dim_date",
            Self::Hours => "dim_hour",
            Self::Components => "dim_component",
            Self::Values => "fact_value",
        }
    }
}

/// Ids already present in the three global dimensions.
#[derive(Debug, Default, Clone)]
pub struct DimensionIds {
    pub dates: HashSet<String>,
    pub hours: HashSet<String>,
    pub components: HashSet<String>,
}

fn status_from_row(row: &SqliteRow) -> RepoResult<Option<u16>> {
    let raw: Option<i64> = row.try_get("pa_status_code")?;
    Ok(raw.and_then(|code| u16::try_from(code).ok()))
}

fn area_from_row(row: &SqliteRow, with_data: bool) -> RepoResult<PostalArea> {
    Ok(PostalArea {
        id: row.try_get("pa_id")?,
        code: row.try_get("pa_code")?,
        name: row.try_get("pa_name")?,
        status_code: status_from_row(row)?,
        data: if with_data { row.try_get("pa_data")? } else { None },
        city_id: row.try_get("ci_id")?,
    })
}

#[derive(Debug, Clone)]
pub struct PriceRepository {
    pool: SqlitePool,
}

impl PriceRepository {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===============================
    // TASK QUEUE / SESSION
    // ===============================

    /// Areas of one country that still need fetching, ordered by postal code.
    pub async fn eligible_areas(&self, country: &str) -> RepoResult<Vec<PostalArea>> {
        let rows = sqlx::query(
            r"
            SELECT pa.pa_id, pa.pa_code, pa.pa_name, pa.pa_status_code, pa.ci_id
            FROM postal_areas pa
            JOIN cities ci ON ci.ci_id = pa.ci_id
            JOIN provinces p ON p.p_id = ci.p_id
            WHERE p.c_id = ?
              AND (pa.pa_status_code IS NULL OR pa.pa_status_code != 200)
            ORDER BY pa.pa_code ASC, pa.pa_id ASC
            ",
        )
        .bind(ids::country_id(country))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| area_from_row(row, false)).collect()
    }

    /// Reset status and payload of every area so the next run refetches everything.
    pub async fn clear_fetch_state(&self) -> RepoResult<u64> {
        let result = sqlx::query("UPDATE postal_areas SET pa_status_code = NULL, pa_data = NULL")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Current row for an area, read through the caller's session.
    pub async fn find_area(conn: &mut SqliteConnection, id: &str) -> RepoResult<Option<PostalArea>> {
        let row = sqlx::query(
            "SELECT pa_id, pa_code, pa_name, pa_status_code, pa_data, ci_id FROM postal_areas WHERE pa_id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| area_from_row(&r, true)).transpose()
    }

    pub async fn set_status(conn: &mut SqliteConnection, id: &str, status: u16) -> RepoResult<()> {
        sqlx::query("UPDATE postal_areas SET pa_status_code = ? WHERE pa_id = ?")
            .bind(i64::from(status))
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn store_payload(conn: &mut SqliteConnection, id: &str, payload: &str) -> RepoResult<()> {
        sqlx::query("UPDATE postal_areas SET pa_data = ? WHERE pa_id = ?")
            .bind(payload)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// `(pa_id, pa_data)` for every area with a stored payload.
    pub async fn stored_payloads(&self) -> RepoResult<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT pa_id, pa_data FROM postal_areas WHERE pa_data IS NOT NULL ORDER BY pa_code")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> RepoResult<(String, String)> { Ok((row.try_get("pa_id")?, row.try_get("pa_data")?)) })
            .collect()
    }

    // ===============================
    // STAR SCHEMA
    // ===============================

    pub async fn dimension_ids(&self) -> RepoResult<DimensionIds> {
        let dates: Vec<String> = sqlx::query_scalar("SELECT d_id FROM dim_date").fetch_all(&self.pool).await?;
        let hours: Vec<String> = sqlx::query_scalar("SELECT h_id FROM dim_hour").fetch_all(&self.pool).await?;
        let components: Vec<String> = sqlx::query_scalar("SELECT co_id FROM dim_component")
            .fetch_all(&self.pool)
            .await?;
        Ok(DimensionIds {
            dates: dates.into_iter().collect(),
            hours: hours.into_iter().collect(),
            components: components.into_iter().collect(),
        })
    }

    pub async fn insert_date(conn: &mut SqliteConnection, date: &DateDim) -> RepoResult<()> {
        sqlx::query("INSERT INTO dim_date (d_id, d_date) VALUES (?, ?) ON CONFLICT (d_id) DO NOTHING")
            .bind(&date.id)
            .bind(&date.date)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn insert_hour(conn: &mut SqliteConnection, hour: &HourDim) -> RepoResult<()> {
        sqlx::query("INSERT INTO dim_hour (h_id, h_hour) VALUES (?, ?) ON CONFLICT (h_id) DO NOTHING")
            .bind(&hour.id)
            .bind(i64::from(hour.hour))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn insert_component(conn: &mut SqliteConnection, component: &Component) -> RepoResult<()> {
        sqlx::query("INSERT INTO dim_component (co_id, co_name) VALUES (?, ?) ON CONFLICT (co_id) DO NOTHING")
            .bind(&component.id)
            .bind(&component.name)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Plain insert: a repeated composite key surfaces as a unique violation.
    pub async fn insert_value(conn: &mut SqliteConnection, value: &PriceValue) -> RepoResult<()> {
        sqlx::query("INSERT INTO fact_value (pa_id, d_id, h_id, co_id, v_value) VALUES (?, ?, ?, ?, ?)")
            .bind(&value.postal_area_id)
            .bind(&value.date_id)
            .bind(&value.hour_id)
            .bind(&value.component_id)
            .bind(value.amount)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    // ===============================
    // GEOGRAPHY
    // ===============================

    /// Returns whether a new row was written.
    pub async fn insert_country(conn: &mut SqliteConnection, country: &Country) -> RepoResult<bool> {
        let result = sqlx::query(
            "INSERT INTO countries (c_id, c_name, c_vat, c_currency) VALUES (?, ?, ?, ?) ON CONFLICT (c_id) DO NOTHING",
        )
        .bind(&country.id)
        .bind(&country.name)
        .bind(country.vat)
        .bind(&country.currency)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_province(conn: &mut SqliteConnection, province: &Province) -> RepoResult<bool> {
        let result = sqlx::query("INSERT INTO provinces (p_id, p_name, c_id) VALUES (?, ?, ?) ON CONFLICT (p_id) DO NOTHING")
            .bind(&province.id)
            .bind(&province.name)
            .bind(&province.country_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_city(conn: &mut SqliteConnection, city: &City) -> RepoResult<bool> {
        let result = sqlx::query("INSERT INTO cities (ci_id, ci_name, p_id) VALUES (?, ?, ?) ON CONFLICT (ci_id) DO NOTHING")
            .bind(&city.id)
            .bind(&city.name)
            .bind(&city.province_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_postal_area(conn: &mut SqliteConnection, area: &PostalArea) -> RepoResult<bool> {
        let result = sqlx::query(
            "INSERT INTO postal_areas (pa_id, pa_code, pa_name, ci_id) VALUES (?, ?, ?, ?) ON CONFLICT (pa_id) DO NOTHING",
        )
        .bind(&area.id)
        .bind(&area.code)
        .bind(&area.name)
        .bind(&area.city_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_rows(&self, table: Table) -> RepoResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        sqlx::query_scalar(&sql).fetch_one(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestDatabase;

    #[tokio::test]
    async fn eligible_areas_skip_fetched_ones() {
        let db = TestDatabase::new().await.unwrap();
        db.seed_area("Testland", "2000").await.unwrap();
        let fetched = db.seed_area("Testland", "1000").await.unwrap();
        let no_data = db.seed_area("Testland", "3000").await.unwrap();
        db.seed_area("Otherland", "1000").await.unwrap();

        let repo = db.repository();
        let mut conn = db.pool().acquire().await.unwrap();
        PriceRepository::set_status(&mut conn, &fetched.id, 200).await.unwrap();
        PriceRepository::set_status(&mut conn, &no_data.id, 400).await.unwrap();

        let codes: Vec<String> = repo.eligible_areas("TESTLAND").await.unwrap().into_iter().map(|a| a.code).collect();
        assert_eq!(codes, vec!["2000".to_string(), "3000".to_string()]);

        assert_eq!(repo.clear_fetch_state().await.unwrap(), 4);
        assert_eq!(repo.eligible_areas("Testland").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn value_insert_reports_duplicates() {
        let db = TestDatabase::new().await.unwrap();
        let area = db.seed_area("Testland", "1000").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let date = DateDim::new("2024-01-01");
        let hour = HourDim::new(1);
        let component = Component::new("Energy");
        PriceRepository::insert_date(&mut conn, &date).await.unwrap();
        PriceRepository::insert_date(&mut conn, &date).await.unwrap();
        PriceRepository::insert_hour(&mut conn, &hour).await.unwrap();
        PriceRepository::insert_component(&mut conn, &component).await.unwrap();

        let value = PriceValue {
            postal_area_id: area.id,
            date_id: date.id,
            hour_id: hour.id,
            component_id: component.id,
            amount: 12.5,
        };
        PriceRepository::insert_value(&mut conn, &value).await.unwrap();
        let err = PriceRepository::insert_value(&mut conn, &value).await.unwrap_err();
        assert!(is_unique_violation(&err));

        let repo = db.repository();
        assert_eq!(repo.count_rows(Table::Dates).await.unwrap(), 1);
        let seen = repo.dimension_ids().await.unwrap();
        assert_eq!(seen.components.len(), 1);
    }
}
