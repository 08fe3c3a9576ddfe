use std::time::Duration;

use thiserror::Error;

/// Command payload could not be turned into wire bytes, or wire bytes into a command.
///
/// Codec failures are data faults and are never retried.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Failure on a sensor IPC channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Send timeout after {0:?}")]
    SendTimeout(Duration),

    #[error("Receive timeout after {0:?}")]
    RecvTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ChannelError {
    /// True for send or receive deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SendTimeout(_) | Self::RecvTimeout(_))
    }
}

/// Collaborator step that can fail during a profiling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalStep {
    ImageInspection,
    ContainerLaunch,
    ContainerShutdown,
    DataCollection,
    ArtifactRemoval,
    HttpProbe,
}

impl std::fmt::Display for ExternalStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ImageInspection => "image inspection",
            Self::ContainerLaunch => "container launch",
            Self::ContainerShutdown => "container shutdown",
            Self::DataCollection => "data collection",
            Self::ArtifactRemoval => "artifact removal",
            Self::HttpProbe => "http probe",
        };
        write!(f, "{s}")
    }
}

/// Top-level error type for the profiler.
#[derive(Error, Debug)]
pub enum SlimError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("{step} failed: {message}")]
    Step { step: ExternalStep, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SlimError {
    /// Wrap a collaborator failure with the step it happened in.
    pub fn step(step: ExternalStep, err: impl std::fmt::Display) -> Self {
        Self::Step {
            step,
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for SlimError {
    fn from(err: CodecError) -> Self {
        Self::Channel(ChannelError::Codec(err))
    }
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, SlimError>;
