pub mod logging;
pub mod utils;

pub mod artifacts;
pub mod container_engine;
pub mod container_session;
pub mod continuation;
pub mod docker_client;
pub mod http_probe;
pub mod ipc;
pub mod orchestrator;

pub use logging::{init_logging, LogFormat};
pub use utils::{with_retry, CompletionNotifier, CompletionSignal, RetryBudget, RetryConfig};

pub use artifacts::{ArtifactStore, FsArtifactStore, SENSOR_REPORT_FILE};
pub use container_engine::{ContainerEngine, DockerEngine};
pub use container_session::{ContainerSession, MonitorStatus};
pub use continuation::{resolve_continuation, Continuation, ContinuationController};
pub use docker_client::{connect, resolve_docker_endpoint, target_host, DockerEndpoint};
pub use http_probe::{CustomProbe, HttpProbe, ProbeSummary};
pub use ipc::{
    open_session_channels, ChannelConnector, ChannelSettings, CommandChannel, Endpoint,
    EndpointConfig, EventChannel, ZmqConnector, ZmqEndpoint,
};
pub use orchestrator::{SessionOptions, SessionOrchestrator, SessionReport, SessionState};
