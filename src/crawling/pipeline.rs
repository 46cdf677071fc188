//! # Fetch-and-persist pipeline
//!
//! What a worker does with one dispatched task. Nothing in here returns an
//! error: every failure is logged and folded into a [`TaskOutcome`] so the
//! worker loop keeps going.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Connection, SqliteConnection};
use std::time::Duration;

use crate::crawling::queues::{PostalTask, TaskQueue};
use crate::crawling::workers::WorkerContext;
use crate::domain::entities::FetchStatus;
use crate::infrastructure::http_client::FetchResponse;
use crate::infrastructure::price_repository::{PriceRepository, is_unique_violation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Area is marked as having no data; no request was made.
    Skipped,
    /// 2xx response committed; `transformed` when the transform also ran cleanly.
    Stored { status: u16, transformed: bool },
    /// Non-2xx response; the status was persisted.
    HttpFailure { status: u16 },
    /// 2xx response whose body is not JSON; nothing was persisted.
    InvalidBody { status: u16 },
    /// The status arrived but the body could not be read; the status was persisted.
    BodyFailure { status: u16 },
    /// No status was ever received.
    TransportFailure,
    /// Constraint conflict while persisting; only the status was rewritten.
    Conflict { status: u16 },
    Failed(String),
}

/// Uniform random pause between `min` and `max`.
pub fn jittered_delay(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = (min.as_millis(), max.as_millis());
    if hi <= lo {
        return min;
    }
    let lo = u64::try_from(lo).unwrap_or(u64::MAX);
    let hi = u64::try_from(hi).unwrap_or(u64::MAX);
    Duration::from_millis(fastrand::u64(lo..=hi))
}

/// Run one task, then sleep the politeness delay unless it was skipped.
pub async fn process_task(
    ctx: &WorkerContext,
    conn: &mut SqliteConnection,
    queue: &TaskQueue,
    task: &PostalTask,
    fetch_date: NaiveDate,
) -> TaskOutcome {
    let outcome = fetch_and_persist(ctx, conn, queue, task, fetch_date).await;
    if outcome != TaskOutcome::Skipped {
        let (min, max) = ctx.policy.delay_bounds();
        tokio::time::sleep(jittered_delay(min, max)).await;
    }
    outcome
}

async fn fetch_and_persist(
    ctx: &WorkerContext,
    conn: &mut SqliteConnection,
    queue: &TaskQueue,
    task: &PostalTask,
    fetch_date: NaiveDate,
) -> TaskOutcome {
    let id = task.area_id.as_str();

    // the queue snapshot may be stale; the stored status decides
    let area = match PriceRepository::find_area(conn, id).await {
        Ok(Some(area)) => area,
        Ok(None) => {
            ctx.events.log(format!("{id} | postal area no longer exists"));
            return TaskOutcome::Failed("postal area no longer exists".to_string());
        }
        Err(e) => {
            ctx.events.log_forced(format!("{id} | Error: {e}"));
            return TaskOutcome::Failed(e.to_string());
        }
    };

    if area.fetch_status() == FetchStatus::NoData {
        ctx.events.log(format!("{id} | {} NO DATA!", area.code));
        return TaskOutcome::Skipped;
    }

    let url = queue.url_for(task);
    ctx.events.log(format!("{id} | {url}"));

    let response = match ctx.fetcher.fetch(&url).await {
        Ok(response) => response,
        Err(e) => {
            let Some(status) = e.status() else {
                ctx.events.log(format!("{id} | Status Code: None ({e})"));
                return TaskOutcome::TransportFailure;
            };
            ctx.events.log(format!("{id} | Status Code: {status} ({e})"));
            return match PriceRepository::set_status(conn, id, status).await {
                Ok(()) => TaskOutcome::BodyFailure { status },
                Err(e) => {
                    ctx.events.log_forced(format!("{id} | Error: {e}"));
                    TaskOutcome::Failed(e.to_string())
                }
            };
        }
    };

    if !response.is_success() {
        ctx.events.log(format!("{id} | Status Code: {}", response.status));
        return match PriceRepository::set_status(conn, id, response.status).await {
            Ok(()) => TaskOutcome::HttpFailure { status: response.status },
            Err(e) => {
                ctx.events.log_forced(format!("{id} | Error: {e}"));
                TaskOutcome::Failed(e.to_string())
            }
        };
    }

    let payload: Value = match serde_json::from_str(&response.body) {
        Ok(payload) => payload,
        Err(e) => {
            ctx.events.log_forced(format!("{id} | Error: response is not JSON: {e}"));
            return TaskOutcome::InvalidBody { status: response.status };
        }
    };

    if let Err(e) = persist_success(ctx, conn, id, &response, &payload).await {
        if is_unique_violation(&e) {
            ctx.events.log(format!("{id} | Duplicate"));
            return match PriceRepository::set_status(conn, id, response.status).await {
                Ok(()) => TaskOutcome::Conflict { status: response.status },
                Err(e) => TaskOutcome::Failed(e.to_string()),
            };
        }
        ctx.events.log_forced(format!("{id} | Error: {e}"));
        return TaskOutcome::Failed(e.to_string());
    }

    if ctx.policy.save_json_file() {
        ctx.events.log(format!("{id} | Saving JSON File"));
        if let Err(e) = ctx.archive.write(fetch_date, queue.country(), &area.code, &payload).await {
            ctx.events.log_forced(format!("{id} | Error: failed to write JSON file: {e}"));
        }
    }

    let mut transformed = false;
    if ctx.policy.transform_on_fetch() {
        ctx.events.log(format!("{id} | Transforming JSON.."));
        match ctx.transform.transform(conn, id, &payload).await {
            Ok(_) => transformed = true,
            Err(e) => ctx.events.log(format!("{id} | Error transforming data: {e}")),
        }
    }

    TaskOutcome::Stored { status: response.status, transformed }
}

/// Status and optional payload in one transaction.
async fn persist_success(
    ctx: &WorkerContext,
    conn: &mut SqliteConnection,
    id: &str,
    response: &FetchResponse,
    payload: &Value,
) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;
    PriceRepository::set_status(&mut tx, id, response.status).await?;
    if ctx.policy.save_json_db() {
        ctx.events.log(format!("{id} | Saving JSON in Database"));
        PriceRepository::store_payload(&mut tx, id, &payload.to_string()).await?;
    }
    tx.commit().await
}
