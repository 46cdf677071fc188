//! # Crawling Orchestrator
//!
//! Owns the per-country task queues, the worker pool, the transform engine
//! and the runtime fetch policy. At most one run is active at a time; every
//! state change is published through the event sink.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::crawling::queues::TaskQueue;
use crate::crawling::transform::{BatchReport, TransformEngine, TransformError};
use crate::crawling::workers::{AddOutcome, FetchPolicyProvider, WorkerContext, WorkerExit, WorkerPool};
use crate::domain::events::{BotEvent, EventSink, EventTarget};
use crate::infrastructure::config::{AppConfig, CountryConfig};
use crate::infrastructure::geo_import::{GeoImportError, GeoImporter, ImportSummary};
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::payload_archive::PayloadArchive;
use crate::infrastructure::price_repository::PriceRepository;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("No tasks available")]
    NoTasks,

    #[error("No workers available")]
    NoWorkers,

    #[error("Unknown country: {0}")]
    UnknownCountry(String),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub exits: Vec<(usize, WorkerExit)>,
}

impl RunReport {
    #[must_use]
    pub fn all_drained(&self) -> bool {
        self.exits.iter().all(|(_, exit)| *exit == WorkerExit::Drained)
    }
}

/// What a `set_process` request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    Started,
    Stopping,
}

/// Runtime-mutable fetch settings, seeded from configuration.
#[derive(Debug)]
pub struct FetchPolicy {
    min_delay_ms: AtomicU64,
    max_delay_ms: AtomicU64,
    save_json_db: AtomicBool,
    save_json_file: AtomicBool,
    transform_on_fetch: AtomicBool,
}

impl FetchPolicy {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_delay_ms: AtomicU64::new(config.fetch.min_delay_ms),
            max_delay_ms: AtomicU64::new(config.fetch.max_delay_ms),
            save_json_db: AtomicBool::new(config.persistence.save_json_db),
            save_json_file: AtomicBool::new(config.persistence.save_json_file),
            transform_on_fetch: AtomicBool::new(config.persistence.transform_on_fetch),
        }
    }

    /// Flip and return the new value.
    pub fn toggle_save_json_db(&self) -> bool {
        !self.save_json_db.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn toggle_save_json_file(&self) -> bool {
        !self.save_json_file.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn toggle_transform_on_fetch(&self) -> bool {
        !self.transform_on_fetch.fetch_xor(true, Ordering::SeqCst)
    }
}

impl FetchPolicyProvider for FetchPolicy {
    fn delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_delay_ms.load(Ordering::Relaxed)),
            Duration::from_millis(self.max_delay_ms.load(Ordering::Relaxed)),
        )
    }

    fn save_json_db(&self) -> bool {
        self.save_json_db.load(Ordering::SeqCst)
    }

    fn save_json_file(&self) -> bool {
        self.save_json_file.load(Ordering::SeqCst)
    }

    fn transform_on_fetch(&self) -> bool {
        self.transform_on_fetch.load(Ordering::SeqCst)
    }
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    repository: PriceRepository,
    queues: RwLock<Vec<Arc<TaskQueue>>>,
    pool: WorkerPool,
    transform: Arc<TransformEngine>,
    policy: Arc<FetchPolicy>,
    fetcher: Arc<dyn PageFetcher>,
    archive: PayloadArchive,
    events: Arc<dyn EventSink>,
    in_process: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        repository: PriceRepository,
        fetcher: Arc<dyn PageFetcher>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let transform = Arc::new(TransformEngine::new(&config.transform, repository.clone(), Arc::clone(&events)));
        Self {
            pool: WorkerPool::with_workers(config.scheduler.initial_workers),
            policy: Arc::new(FetchPolicy::from_config(&config)),
            archive: PayloadArchive::new(config.persistence.json_log_dir.clone()),
            queues: RwLock::new(Vec::new()),
            in_process: AtomicBool::new(false),
            transform,
            config,
            repository,
            fetcher,
            events,
        }
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        if self.is_running() { RunPhase::Running } else { RunPhase::Idle }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_process.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn transform_engine(&self) -> &Arc<TransformEngine> {
        &self.transform
    }

    #[must_use]
    pub const fn repository(&self) -> &PriceRepository {
        &self.repository
    }

    pub async fn queues(&self) -> Vec<Arc<TaskQueue>> {
        self.queues.read().await.clone()
    }

    // ===============================
    // TASKS
    // ===============================

    /// Rebuild and load one queue per configured country.
    ///
    /// # Errors
    /// [`OrchestratorError::AlreadyRunning`] while a run is active.
    pub async fn init_tasks(&self) -> Result<usize, OrchestratorError> {
        if self.is_running() {
            self.events
                .log_forced("Failed to reset tasks! Stop the process first before resetting tasks.".to_string());
            return Err(OrchestratorError::AlreadyRunning);
        }
        Ok(self.reload_tasks().await)
    }

    async fn reload_tasks(&self) -> usize {
        let mut queues = Vec::with_capacity(self.config.countries.len());
        let mut total = 0;
        for country in &self.config.countries {
            let queue = Arc::new(TaskQueue::new(country, Arc::clone(&self.events)));
            // load failures are already logged; the queue stays empty
            total += queue.load(&self.repository).await.unwrap_or_default();
            self.events.log_forced(format!("Task for {} added", country.name));
            queues.push(queue);
        }

        *self.queues.write().await = queues;
        self.events.log_forced("Tasks set".to_string());
        total
    }

    pub async fn add_task(&self, country: &CountryConfig) -> usize {
        let queue = Arc::new(TaskQueue::new(country, Arc::clone(&self.events)));
        let loaded = queue.load(&self.repository).await.unwrap_or_default();
        self.queues.write().await.push(queue);
        self.events.log_forced(format!("Task for {} added", country.name));
        loaded
    }

    pub async fn remove_task(&self, country: &str) -> Result<(), OrchestratorError> {
        let mut queues = self.queues.write().await;
        let Some(index) = queues.iter().position(|q| q.country() == country) else {
            self.events.log_forced(format!("Task for {country} not found"));
            return Err(OrchestratorError::UnknownCountry(country.to_string()));
        };
        queues.remove(index);
        self.events.log_forced(format!("Task for {country} deleted"));
        Ok(())
    }

    // ===============================
    // WORKERS
    // ===============================

    pub async fn add_worker(&self) -> AddOutcome {
        let outcome = self.pool.add().await;
        if outcome.deferred {
            self.events.log_forced("1 worker added | restart process required for effect".to_string());
        } else {
            self.events.log_forced("1 worker added".to_string());
        }
        let required = outcome.size + 2;
        if required > self.config.database.max_connections as usize {
            warn!(
                "{} workers need {} database connections, pool allows {}",
                outcome.size, required, self.config.database.max_connections
            );
        }
        self.events.emit(BotEvent::WorkerCount(outcome.size));
        outcome
    }

    pub async fn remove_worker(&self) -> Option<usize> {
        let remaining = self.pool.remove().await;
        match remaining {
            Some(size) => {
                self.events.log_forced("1 worker removed".to_string());
                self.events.emit(BotEvent::WorkerCount(size));
            }
            None => {
                self.events.log_forced("No workers".to_string());
                self.events.emit(BotEvent::WorkerCount(0));
            }
        }
        remaining
    }

    pub async fn stop_workers(&self) {
        self.pool.stop_all().await;
        self.events.log_forced("Workers forced to stop".to_string());
    }

    pub async fn worker_count(&self) -> usize {
        self.pool.len().await
    }

    // ===============================
    // RUNS
    // ===============================

    fn set_process(&self, running: bool, target: EventTarget) {
        let message = if running { "Process is running!" } else { "No process running!" };
        self.events.emit_to(target, BotEvent::forced(message));
        self.events.emit_to(target, BotEvent::ProcessState(running));
    }

    fn worker_context(&self) -> WorkerContext {
        let policy: Arc<dyn FetchPolicyProvider> = self.policy.clone();
        WorkerContext {
            pool: self.repository.pool().clone(),
            fetcher: Arc::clone(&self.fetcher),
            transform: Arc::clone(&self.transform),
            archive: self.archive.clone(),
            policy,
            events: Arc::clone(&self.events),
        }
    }

    /// Take the run slot and re-arm the workers. `false` when a run holds it.
    async fn claim_run(&self) -> bool {
        if self
            .in_process
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.pool.arm().await;
        true
    }

    fn release_run(&self) {
        self.in_process.store(false, Ordering::SeqCst);
    }

    /// Run every worker over the current queues and wait for all of them.
    pub async fn run_workers(&self) -> Result<RunReport, OrchestratorError> {
        if self.queues.read().await.is_empty() {
            self.events.log_forced("no tasks available!!".to_string());
            return Err(OrchestratorError::NoTasks);
        }
        if self.pool.is_empty().await {
            self.events.log_forced("no workers available!!".to_string());
            return Err(OrchestratorError::NoWorkers);
        }
        if !self.claim_run().await {
            self.events.log_forced("the previous process is still running!".to_string());
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.drive_claimed().await
    }

    /// Run the pool while holding the run slot; releases it on every path.
    async fn drive_claimed(&self) -> Result<RunReport, OrchestratorError> {
        let queues: Arc<[Arc<TaskQueue>]> = self.queues.read().await.clone().into();
        if queues.is_empty() {
            self.release_run();
            self.events.log_forced("no tasks available!!".to_string());
            return Err(OrchestratorError::NoTasks);
        }

        self.set_process(true, EventTarget::Broadcast);
        let result = self.pool.run(&self.worker_context(), queues).await;
        self.release_run();
        self.set_process(false, EventTarget::Broadcast);

        let exits = result.map_err(|_| OrchestratorError::AlreadyRunning)?;
        debug!("run finished: {:?}", exits);
        Ok(RunReport { exits })
    }

    /// Reset every area's status and payload.
    pub async fn clear_session(&self) -> Result<u64, OrchestratorError> {
        self.events.log("Cleaning up pa_data...".to_string());
        match self.repository.clear_fetch_state().await {
            Ok(rows) => {
                self.events.log("pa_data cleanup complete.".to_string());
                Ok(rows)
            }
            Err(e) => {
                self.events.log_forced(format!("Cleanup failed: {e}"));
                Err(OrchestratorError::DatabaseError(e.to_string()))
            }
        }
    }

    /// One scheduled run: optional fresh session, reload tasks, run workers.
    pub async fn run_cycle(&self, fresh_session: bool) -> Result<RunReport, OrchestratorError> {
        if self.pool.is_empty().await {
            self.events.log_forced("no workers available!".to_string());
            return Err(OrchestratorError::NoWorkers);
        }
        if !self.claim_run().await {
            self.events.log_forced("the previous process is still running!".to_string());
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.cycle_claimed(fresh_session).await
    }

    async fn cycle_claimed(&self, fresh_session: bool) -> Result<RunReport, OrchestratorError> {
        if self.pool.is_empty().await {
            self.release_run();
            self.events.log_forced("no workers available!".to_string());
            return Err(OrchestratorError::NoWorkers);
        }
        if fresh_session {
            if let Err(e) = self.clear_session().await {
                self.release_run();
                return Err(e);
            }
        }
        self.reload_tasks().await;
        self.drive_claimed().await
    }

    /// Start a run in the background, or stop the active one.
    ///
    /// The run slot is taken before this returns, so a second request made
    /// right after the first always stops it.
    pub async fn request_run(self: &Arc<Self>, fresh_session: bool) -> RunRequest {
        if !self.claim_run().await {
            self.stop_workers().await;
            return RunRequest::Stopping;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.cycle_claimed(fresh_session).await {
                debug!("run cycle ended without running: {e}");
            }
        });
        RunRequest::Started
    }

    // ===============================
    // PERSISTENCE TOGGLES
    // ===============================

    pub fn toggle_save_json_db(&self) -> bool {
        let enabled = self.policy.toggle_save_json_db();
        self.events.emit(BotEvent::SaveJsonDb(enabled));
        let message = if enabled { "JSON-DB saving enabled" } else { "JSON-DB saving disabled" };
        self.events.log_forced(message.to_string());
        enabled
    }

    pub fn toggle_save_json_file(&self) -> bool {
        let enabled = self.policy.toggle_save_json_file();
        self.events.emit(BotEvent::SaveJsonFile(enabled));
        if enabled {
            self.events.log_forced(format!(
                "JSON file saving enabled | Dir Path: {}",
                self.archive.root().display()
            ));
        } else {
            self.events.log_forced("JSON file saving disabled".to_string());
        }
        enabled
    }

    // ===============================
    // BATCH OPERATIONS
    // ===============================

    pub async fn transform_all(&self) -> Result<BatchReport, OrchestratorError> {
        Ok(self.transform.transform_all().await?)
    }

    /// Import every configured country concurrently, then reload the queues.
    pub async fn import_geography(
        &self,
        importer: &dyn GeoImporter,
    ) -> Vec<(String, Result<ImportSummary, GeoImportError>)> {
        let imports = self.config.countries.iter().map(|country| async move {
            let result = importer.import_country(country).await;
            if let Err(e) = &result {
                self.events.log_forced(format!("Error: {e}"));
            }
            (country.name.clone(), result)
        });
        let results = join_all(imports).await;

        let _ = self.init_tasks().await;
        self.events.log_forced("Import completed!".to_string());
        results
    }

    /// Run state, task progress and worker count for one observer.
    pub async fn report_state(&self, target: EventTarget) {
        self.set_process(self.is_running(), target);
        for queue in self.queues.read().await.iter() {
            queue.report_progress(target).await;
        }
        self.events.emit_to(target, BotEvent::WorkerCount(self.worker_count().await));
    }

    pub fn report_persistence(&self, target: EventTarget) {
        self.events.emit_to(target, BotEvent::SaveJsonDb(self.policy.save_json_db()));
        self.events.emit_to(target, BotEvent::SaveJsonFile(self.policy.save_json_file()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_toggles_flip_and_report_new_value() {
        let policy = FetchPolicy::from_config(&AppConfig::default());
        assert!(!policy.save_json_db());
        assert!(policy.toggle_save_json_db());
        assert!(policy.save_json_db());
        assert!(!policy.toggle_save_json_file());
        assert!(!policy.toggle_transform_on_fetch());
        assert!(!policy.transform_on_fetch());
    }
}
