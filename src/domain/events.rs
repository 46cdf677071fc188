//! # Bot events
//!
//! Components never talk to observers directly. They hand typed [`BotEvent`]s
//! to an [`EventSink`]; the control hub drains them from a single queue and
//! fans them out to the connected control clients.

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Outbound state change or log line.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    /// Free-form log line. Non-forced lines reach clients only in verbose mode.
    Log { message: String, force: bool },
    TaskProgress { country: String, cursor: usize, total: usize },
    ProcessState(bool),
    WorkerCount(usize),
    SchedulerInterval(u64),
    PauseTimer(bool),
    VerboseLog(bool),
    SaveJsonDb(bool),
    SaveJsonFile(bool),
    Timer(u64),
}

impl BotEvent {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log { message: message.into(), force: false }
    }

    pub fn forced(message: impl Into<String>) -> Self {
        Self::Log { message: message.into(), force: true }
    }

    /// Wire action name.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Log { .. } => "get_log",
            Self::TaskProgress { .. } => "get_num_task",
            Self::ProcessState(_) => "get_process",
            Self::WorkerCount(_) => "get_num_workers",
            Self::SchedulerInterval(_) => "get_scheduler_interval",
            Self::PauseTimer(_) => "get_pause_timer",
            Self::VerboseLog(_) => "get_verbose_log",
            Self::SaveJsonDb(_) => "get_save_json_db",
            Self::SaveJsonFile(_) => "get_save_json_file",
            Self::Timer(_) => "get_timer",
        }
    }

    /// Wire payload.
    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Self::Log { message, .. } => json!(message),
            Self::TaskProgress { country, cursor, total } => {
                json!({ "id": country, "data": format!("{cursor}/{total}") })
            }
            Self::ProcessState(v)
            | Self::PauseTimer(v)
            | Self::VerboseLog(v)
            | Self::SaveJsonDb(v)
            | Self::SaveJsonFile(v) => json!(v),
            Self::WorkerCount(n) => json!(n),
            Self::SchedulerInterval(n) | Self::Timer(n) => json!(n),
        }
    }

    #[must_use]
    pub const fn is_optional_log(&self) -> bool {
        matches!(self, Self::Log { force: false, .. })
    }
}

/// Who should receive an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Broadcast,
    Connection(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub target: EventTarget,
    pub event: BotEvent,
}

pub trait EventSink: Send + Sync {
    fn emit_to(&self, target: EventTarget, event: BotEvent);

    fn emit(&self, event: BotEvent) {
        self.emit_to(EventTarget::Broadcast, event);
    }

    fn log(&self, message: String) {
        self.emit(BotEvent::log(message));
    }

    fn log_forced(&self, message: String) {
        self.emit(BotEvent::forced(message));
    }
}

fn mirror_to_tracing(event: &BotEvent) {
    match event {
        BotEvent::Log { message, force: true } => info!(target: "bot", "{message}"),
        BotEvent::Log { message, force: false } => debug!(target: "bot", "{message}"),
        other => trace!(target: "bot", action = other.action(), data = %other.data(), "event"),
    }
}

/// Producer side of the hub's event queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventBus {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for EventBus {
    fn emit_to(&self, target: EventTarget, event: BotEvent) {
        mirror_to_tracing(&event);
        if self.tx.send(Dispatch { target, event }).is_err() {
            trace!("event hub is gone, dropping event");
        }
    }
}

/// Sink for headless use: events only reach the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit_to(&self, _target: EventTarget, event: BotEvent) {
        mirror_to_tracing(&event);
    }
}
