pub mod container;
pub mod enums;
pub mod error;
pub mod message;

// Re-exports for convenience
pub use container::{
    HttpProbeCmd, ImageInfo, LaunchSpec, LaunchedContainer, SensorEvent, VolumeMount,
};
pub use enums::{ChannelRole, ContinueAfterMode};
pub use error::{ChannelError, CodecError, ExternalStep, Result, SlimError};
pub use message::{
    CommandMessage, StartMonitor, EVT_MONITOR_FINISH_COMPLETED, EVT_MONITOR_FINISH_ERROR,
};
