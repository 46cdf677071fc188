//! # Task Queues
//!
//! One [`TaskQueue`] per country: the postal areas still eligible for fetch,
//! plus a cursor. Dispatch is serialized by a mutex so that any number of
//! workers sharing the queue receive every position exactly once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::events::{BotEvent, EventSink, EventTarget};
use crate::infrastructure::config::CountryConfig;
use crate::infrastructure::price_repository::PriceRepository;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum QueueError {
    #[error("Failed to load tasks for {country}: {message}")]
    Storage { country: String, message: String },
}

/// A single postal area waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostalTask {
    pub area_id: String,
    pub code: String,
}

/// `(cursor, length)` snapshot of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProgress {
    pub cursor: usize,
    pub total: usize,
}

impl QueueProgress {
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.cursor >= self.total
    }
}

#[derive(Debug, Default)]
struct QueueCursor {
    items: Vec<PostalTask>,
    cursor: usize,
}

pub struct TaskQueue {
    country: String,
    base_url: String,
    state: Mutex<QueueCursor>,
    events: Arc<dyn EventSink>,
}

impl TaskQueue {
    /// Empty queue for a configured country; call [`TaskQueue::load`] to fill it.
    pub fn new(country: &CountryConfig, events: Arc<dyn EventSink>) -> Self {
        Self::with_tasks(&country.name, &country.base_url, Vec::new(), events)
    }

    /// Queue over a fixed task list.
    pub fn with_tasks(country: &str, base_url: &str, tasks: Vec<PostalTask>, events: Arc<dyn EventSink>) -> Self {
        Self {
            country: country.to_string(),
            base_url: base_url.to_string(),
            state: Mutex::new(QueueCursor { items: tasks, cursor: 0 }),
            events,
        }
    }

    #[must_use]
    pub fn country(&self) -> &str {
        &self.country
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint for a task: the base URL with the postal code appended.
    #[must_use]
    pub fn url_for(&self, task: &PostalTask) -> String {
        format!("{}{}", self.base_url, task.code)
    }

    /// Re-query eligible areas and rewind the cursor.
    ///
    /// Only call while no worker is draining this queue.
    ///
    /// # Errors
    /// Returns [`QueueError::Storage`] when the query fails; the previous
    /// contents are kept in that case.
    pub async fn load(&self, repository: &PriceRepository) -> Result<usize, QueueError> {
        let areas = match repository.eligible_areas(&self.country).await {
            Ok(areas) => areas,
            Err(e) => {
                self.events.log_forced(format!("Error: failed to load tasks for {}: {e}", self.country));
                return Err(QueueError::Storage { country: self.country.clone(), message: e.to_string() });
            }
        };

        let tasks: Vec<PostalTask> = areas
            .into_iter()
            .map(|area| PostalTask { area_id: area.id, code: area.code })
            .collect();
        let total = tasks.len();

        let mut state = self.state.lock().await;
        state.items = tasks;
        state.cursor = 0;
        self.emit_progress(EventTarget::Broadcast, 0, total);
        Ok(total)
    }

    /// Next undispatched task, or `None` once every position has been handed out.
    pub async fn next(&self) -> Option<PostalTask> {
        let mut state = self.state.lock().await;
        let task = state.items.get(state.cursor).cloned()?;
        state.cursor += 1;
        self.emit_progress(EventTarget::Broadcast, state.cursor, state.items.len());
        Some(task)
    }

    pub async fn progress(&self) -> QueueProgress {
        let state = self.state.lock().await;
        QueueProgress { cursor: state.cursor, total: state.items.len() }
    }

    /// Send the current progress to one observer or all of them.
    pub async fn report_progress(&self, target: EventTarget) {
        let progress = self.progress().await;
        self.emit_progress(target, progress.cursor, progress.total);
    }

    fn emit_progress(&self, target: EventTarget, cursor: usize, total: usize) {
        self.events.emit_to(
            target,
            BotEvent::TaskProgress { country: self.country.clone(), cursor, total },
        );
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("country", &self.country)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::TracingSink;

    fn tasks(n: usize) -> Vec<PostalTask> {
        (0..n)
            .map(|i| PostalTask { area_id: format!("id-{i}"), code: format!("{:04}", i) })
            .collect()
    }

    #[tokio::test]
    async fn dispatches_in_load_order_then_returns_none() {
        let queue = TaskQueue::with_tasks("Testland", "http://x/", tasks(2), Arc::new(TracingSink));

        let first = queue.next().await.unwrap();
        assert_eq!(queue.url_for(&first), "http://x/0000");
        assert_eq!(queue.next().await.unwrap().code, "0001");
        assert!(queue.next().await.is_none());
        assert!(queue.next().await.is_none());
        assert_eq!(queue.progress().await, QueueProgress { cursor: 2, total: 2 });
    }

    #[tokio::test]
    async fn empty_queue_is_exhausted() {
        let queue = TaskQueue::with_tasks("Testland", "http://x/", Vec::new(), Arc::new(TracingSink));
        assert!(queue.next().await.is_none());
        assert!(queue.progress().await.is_exhausted());
    }
}
