//! # Worker Pool
//!
//! A [`FetchWorker`] repeatedly visits every task queue in a fixed order and
//! runs the fetch pipeline for each task it receives. It ends when a whole
//! round finds every queue exhausted, or at the start of the first round
//! after its stop flag was raised.
//!
//! The [`WorkerPool`] owns the ordered worker list. It can be resized at any
//! time; a worker added during a run only takes part in the next one.

use chrono::Local;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::crawling::pipeline::{self, TaskOutcome};
use crate::crawling::queues::TaskQueue;
use crate::crawling::transform::TransformEngine;
use crate::domain::events::EventSink;
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::payload_archive::PayloadArchive;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum WorkerError {
    #[error("Worker pool is already running")]
    AlreadyRunning,

    #[error("Failed to open storage session: {0}")]
    SessionUnavailable(String),
}

/// Runtime fetch settings as seen by workers.
pub trait FetchPolicyProvider: Send + Sync {
    fn delay_bounds(&self) -> (Duration, Duration);
    fn save_json_db(&self) -> bool;
    fn save_json_file(&self) -> bool;
    fn transform_on_fetch(&self) -> bool;
}

/// Everything a worker needs besides its queues.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: SqlitePool,
    pub fetcher: Arc<dyn PageFetcher>,
    pub transform: Arc<TransformEngine>,
    pub archive: PayloadArchive,
    pub policy: Arc<dyn FetchPolicyProvider>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerExit {
    /// Every queue was exhausted.
    Drained,
    /// The stop flag was observed.
    Stopped,
    Failed(String),
}

#[derive(Debug)]
pub struct FetchWorker {
    id: usize,
    stop: AtomicBool,
}

impl FetchWorker {
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self { id, stop: AtomicBool::new(false) }
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Cooperative: takes effect at the start of the next round.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn rearm(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    /// Drain `queues` on one pooled connection held for the whole run.
    pub async fn run(&self, ctx: &WorkerContext, queues: &[Arc<TaskQueue>]) -> WorkerExit {
        let mut conn = match ctx.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                let error = WorkerError::SessionUnavailable(e.to_string());
                ctx.events.log_forced(format!("Worker {}: {error}", self.id));
                return WorkerExit::Failed(error.to_string());
            }
        };

        loop {
            if self.is_stopped() {
                debug!("worker {} stopped", self.id);
                return WorkerExit::Stopped;
            }

            let today = Local::now().date_naive();
            let mut exhausted = 0;
            for queue in queues {
                let Some(task) = queue.next().await else {
                    exhausted += 1;
                    continue;
                };
                let outcome = pipeline::process_task(ctx, &mut conn, queue, &task, today).await;
                if matches!(outcome, TaskOutcome::Failed(_)) {
                    warn!("worker {} | {} {}: {:?}", self.id, queue.country(), task.code, outcome);
                } else {
                    debug!("worker {} | {} {}: {:?}", self.id, queue.country(), task.code, outcome);
                }
            }

            if exhausted == queues.len() {
                debug!("worker {} drained all queues", self.id);
                return WorkerExit::Drained;
            }
        }
    }
}

/// Size after an `add`, and whether it only applies to the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub size: usize,
    pub deferred: bool,
}

#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: RwLock<Vec<Arc<FetchWorker>>>,
    running: AtomicBool,
    next_id: AtomicUsize,
}

impl WorkerPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_workers(count: usize) -> Self {
        let workers = (0..count).map(|id| Arc::new(FetchWorker::new(id))).collect();
        Self {
            workers: RwLock::new(workers),
            running: AtomicBool::new(false),
            next_id: AtomicUsize::new(count),
        }
    }

    pub async fn add(&self) -> AddOutcome {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut workers = self.workers.write().await;
        workers.push(Arc::new(FetchWorker::new(id)));
        AddOutcome { size: workers.len(), deferred: self.is_running() }
    }

    /// Stop and drop the most recently added worker. `None` when empty.
    pub async fn remove(&self) -> Option<usize> {
        let mut workers = self.workers.write().await;
        let worker = workers.pop()?;
        worker.stop();
        Some(workers.len())
    }

    /// Clear every stop flag. A stop raised before this call is forgotten,
    /// one raised after it holds until the run ends.
    pub async fn arm(&self) {
        for worker in self.workers.read().await.iter() {
            worker.rearm();
        }
    }

    pub async fn stop_all(&self) {
        for worker in self.workers.read().await.iter() {
            worker.stop();
        }
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn every current worker and wait until all of them have ended.
    ///
    /// Workers still stopped from an earlier [`stop_all`](Self::stop_all)
    /// exit at once; call [`arm`](Self::arm) first to start a fresh run.
    ///
    /// # Errors
    /// [`WorkerError::AlreadyRunning`] when a run is in progress; nothing is started.
    pub async fn run(
        &self,
        ctx: &WorkerContext,
        queues: Arc<[Arc<TaskQueue>]>,
    ) -> Result<Vec<(usize, WorkerExit)>, WorkerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("worker pool start requested while a run is active");
            return Err(WorkerError::AlreadyRunning);
        }

        let snapshot: Vec<Arc<FetchWorker>> = self.workers.read().await.clone();
        let mut set = JoinSet::new();
        for worker in snapshot {
            let ctx = ctx.clone();
            let queues = Arc::clone(&queues);
            set.spawn(async move {
                let exit = worker.run(&ctx, &queues).await;
                (worker.id(), exit)
            });
        }

        let mut exits = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => exits.push(result),
                Err(e) => {
                    ctx.events.log_forced(format!("Error: worker task ended abnormally: {e}"));
                    exits.push((usize::MAX, WorkerExit::Failed(e.to_string())));
                }
            }
        }
        exits.sort_by_key(|(id, _)| *id);

        self.running.store(false, Ordering::SeqCst);
        Ok(exits)
    }
}

/// Fixed policy, mostly for tests and one-off runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub save_json_db: bool,
    pub save_json_file: bool,
    pub transform_on_fetch: bool,
}

impl FetchPolicyProvider for StaticPolicy {
    fn delay_bounds(&self) -> (Duration, Duration) {
        (self.min_delay, self.max_delay)
    }

    fn save_json_db(&self) -> bool {
        self.save_json_db
    }

    fn save_json_file(&self) -> bool {
        self.save_json_file
    }

    fn transform_on_fetch(&self) -> bool {
        self.transform_on_fetch
    }
}
