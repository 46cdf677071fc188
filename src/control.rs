//! # Control channel
//!
//! Websocket clients send `{action, data}` envelopes and receive the same
//! shape back. The [`ControlPanel`] maps inbound actions onto the
//! orchestrator and scheduler; the [`hub::ControlHub`] fans outbound events
//! out to connections.

pub mod hub;
pub mod protocol;
pub mod scheduler;
pub mod server;

use std::sync::Arc;
use uuid::Uuid;

use crate::crawling::orchestrator::Orchestrator;
use crate::domain::events::{BotEvent, EventSink, EventTarget};
use crate::infrastructure::geo_import::GeoImporter;

pub use hub::ControlHub;
pub use protocol::{ControlCommand, ControlEnvelope, ControlError};
pub use scheduler::{SchedulerLoop, TickOutcome};

pub struct ControlPanel {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<SchedulerLoop>,
    hub: Arc<ControlHub>,
    importer: Arc<dyn GeoImporter>,
    events: Arc<dyn EventSink>,
}

impl ControlPanel {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        scheduler: Arc<SchedulerLoop>,
        hub: Arc<ControlHub>,
        importer: Arc<dyn GeoImporter>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { orchestrator, scheduler, hub, importer, events }
    }

    #[must_use]
    pub const fn hub(&self) -> &Arc<ControlHub> {
        &self.hub
    }

    /// Private state snapshot for a freshly connected client.
    pub async fn on_connect(&self, connection: Uuid) {
        let target = EventTarget::Connection(connection);
        self.orchestrator.report_state(target).await;
        self.scheduler.report(target);
        self.events.emit_to(target, BotEvent::VerboseLog(self.hub.is_verbose()));
        self.orchestrator.report_persistence(target);
    }

    /// Handle one raw text frame.
    pub async fn handle_text(&self, connection: Uuid, text: &str) {
        match ControlEnvelope::parse(text) {
            Ok(envelope) => self.handle(connection, &envelope).await,
            Err(e) => self.reply_error(connection, &e),
        }
    }

    pub async fn handle(&self, connection: Uuid, envelope: &ControlEnvelope) {
        match ControlCommand::try_from(envelope) {
            Ok(command) => {
                if let Err(e) = self.execute(command).await {
                    self.reply_error(connection, &e);
                }
            }
            Err(e) => self.reply_error(connection, &e),
        }
    }

    fn reply_error(&self, connection: Uuid, error: &ControlError) {
        let message = match error {
            ControlError::UnknownAction(_) => error.to_string(),
            other => format!("Error: {other}"),
        };
        self.events.emit_to(EventTarget::Connection(connection), BotEvent::forced(message));
    }

    pub async fn execute(&self, command: ControlCommand) -> Result<(), ControlError> {
        match command {
            ControlCommand::SetSchedulerInterval(seconds) => self.scheduler.set_interval(seconds)?,
            ControlCommand::AddWorker => {
                self.orchestrator.add_worker().await;
            }
            ControlCommand::RemoveWorker => {
                self.orchestrator.remove_worker().await;
            }
            ControlCommand::SetProcess { fresh_session } => {
                self.orchestrator.request_run(fresh_session).await;
            }
            ControlCommand::TogglePauseTimer => {
                self.scheduler.toggle_pause();
            }
            ControlCommand::ToggleVerboseLog => {
                let verbose = self.hub.toggle_verbose();
                self.events.emit(BotEvent::VerboseLog(verbose));
                let message = if verbose {
                    "Verbose logging has been enabled."
                } else {
                    "Verbose logging has been disabled."
                };
                self.events.log_forced(message.to_string());
            }
            ControlCommand::SetTasks => {
                // a refusal while running is already reported to every client
                let _ = self.orchestrator.init_tasks().await;
            }
            ControlCommand::ToggleSaveJsonDb => {
                self.orchestrator.toggle_save_json_db();
            }
            ControlCommand::ToggleSaveJsonFile => {
                self.orchestrator.toggle_save_json_file();
            }
            ControlCommand::ImportGeography => {
                let orchestrator = Arc::clone(&self.orchestrator);
                let importer = Arc::clone(&self.importer);
                tokio::spawn(async move {
                    orchestrator.import_geography(importer.as_ref()).await;
                });
            }
        }
        Ok(())
    }
}
