use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Sensor event published once monitoring has been wound down cleanly.
pub const EVT_MONITOR_FINISH_COMPLETED: &str = "monitor.finish.completed";
/// Sensor event published when monitoring could not be finished.
pub const EVT_MONITOR_FINISH_ERROR: &str = "monitor.finish.error";

/// Body of the start-monitor command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartMonitor {
    pub app_name: String,
    #[serde(default)]
    pub app_args: Vec<String>,
    #[serde(default)]
    pub app_workdir: Option<String>,
    #[serde(default)]
    pub excludes: BTreeSet<String>,
    #[serde(default)]
    pub includes: BTreeSet<String>,
}

/// Control command pushed into the sensor over the command channel.
///
/// Wire form is `{"name": <kind>, "data": <body>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum CommandMessage {
    #[serde(rename = "cmd.monitor.start")]
    StartMonitor(StartMonitor),
    #[serde(rename = "cmd.monitor.stop")]
    StopMonitor,
    #[serde(rename = "cmd.sensor.shutdown")]
    ShutdownSensor,
}

impl CommandMessage {
    /// Wire name of the message kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartMonitor(_) => "cmd.monitor.start",
            Self::StopMonitor => "cmd.monitor.stop",
            Self::ShutdownSensor => "cmd.sensor.shutdown",
        }
    }

    /// Serialize to wire bytes, rejecting malformed commands.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if let Self::StartMonitor(body) = self {
            if body.app_name.trim().is_empty() {
                return Err(CodecError::Encode(format!(
                    "malformed {}: empty app_name",
                    self.name()
                )));
            }
        }
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Parse wire bytes back into a command.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl std::fmt::Display for CommandMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
