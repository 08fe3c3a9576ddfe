use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SlimError;

/// Operator-facing "continue after" mode, as given on the command line or in the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinueAfterMode {
    #[default]
    Enter,
    Signal,
    Timeout,
    Probe,
}

impl std::fmt::Display for ContinueAfterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Enter => "enter",
            Self::Signal => "signal",
            Self::Timeout => "timeout",
            Self::Probe => "probe",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ContinueAfterMode {
    type Err = SlimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enter" => Ok(Self::Enter),
            "signal" => Ok(Self::Signal),
            "timeout" => Ok(Self::Timeout),
            "probe" => Ok(Self::Probe),
            other => Err(SlimError::Config(format!(
                "unknown continue-after mode: {other}"
            ))),
        }
    }
}

/// Messaging pattern an IPC endpoint is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelRole {
    CommandClient,
    EventSubscriber,
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CommandClient => "command-client",
            Self::EventSubscriber => "event-subscriber",
        };
        write!(f, "{s}")
    }
}
