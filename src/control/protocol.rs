//! `{action, data}` envelopes exchanged with control clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::events::BotEvent;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlError {
    #[error("Unknown action : {0}")]
    UnknownAction(String),

    #[error("Invalid data for {action}: {message}")]
    InvalidData { action: String, message: String },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl ControlEnvelope {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self { action: action.into(), data }
    }

    pub fn parse(text: &str) -> Result<Self, ControlError> {
        serde_json::from_str(text).map_err(|e| ControlError::Malformed(e.to_string()))
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        // a struct of String and Value always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&BotEvent> for ControlEnvelope {
    fn from(event: &BotEvent) -> Self {
        Self::new(event.action(), event.data())
    }
}

/// Inbound action, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SetSchedulerInterval(u64),
    AddWorker,
    RemoveWorker,
    SetProcess { fresh_session: bool },
    TogglePauseTimer,
    ToggleVerboseLog,
    SetTasks,
    ToggleSaveJsonDb,
    ToggleSaveJsonFile,
    ImportGeography,
}

fn invalid(action: &str, message: impl Into<String>) -> ControlError {
    ControlError::InvalidData { action: action.to_string(), message: message.into() }
}

fn parse_interval(action: &str, data: &Value) -> Result<u64, ControlError> {
    let seconds = match data {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(action, format!("expected a non-negative integer, got {data}")))?;

    if seconds == 0 {
        return Err(ControlError::Configuration("scheduler interval must be at least 1 second".to_string()));
    }
    Ok(seconds)
}

impl TryFrom<&ControlEnvelope> for ControlCommand {
    type Error = ControlError;

    fn try_from(envelope: &ControlEnvelope) -> Result<Self, Self::Error> {
        let action = envelope.action.as_str();
        let command = match action {
            "set_scheduler_interval" => Self::SetSchedulerInterval(parse_interval(action, &envelope.data)?),
            "add_worker" => Self::AddWorker,
            "remove_worker" => Self::RemoveWorker,
            "set_process" => {
                let fresh_session = match &envelope.data {
                    Value::Null => false,
                    Value::Bool(b) => *b,
                    other => return Err(invalid(action, format!("expected a boolean, got {other}"))),
                };
                Self::SetProcess { fresh_session }
            }
            "set_pause_timer" => Self::TogglePauseTimer,
            "set_verbose_log" => Self::ToggleVerboseLog,
            "set_tasks" => Self::SetTasks,
            "set_save_json_db" => Self::ToggleSaveJsonDb,
            "set_save_json_file" => Self::ToggleSaveJsonFile,
            "import_geos_from_csv" => Self::ImportGeography,
            unknown => return Err(ControlError::UnknownAction(unknown.to_string())),
        };
        Ok(command)
    }
}
