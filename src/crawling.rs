//! # Crawling
//!
//! Task queues, fetch workers, the fetch-and-persist pipeline, the star-schema
//! transform and the orchestrator tying them together.

pub mod orchestrator;
pub mod pipeline;
pub mod queues;
pub mod transform;
pub mod workers;

pub use orchestrator::{FetchPolicy, Orchestrator, OrchestratorError, RunPhase, RunReport, RunRequest};
pub use pipeline::TaskOutcome;
pub use queues::{PostalTask, QueueError, QueueProgress, TaskQueue};
pub use transform::{BatchReport, SectionOutcome, TransformEngine, TransformError, TransformReport};
pub use workers::{
    AddOutcome, FetchPolicyProvider, FetchWorker, StaticPolicy, WorkerContext, WorkerError, WorkerExit, WorkerPool,
};
