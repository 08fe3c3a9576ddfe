use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slim_config::Config;
use slim_types::{
    ImageInfo, LaunchSpec, LaunchedContainer, Result, SensorEvent, SlimError, StartMonitor,
    VolumeMount,
};
use tokio::io::AsyncBufRead;
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::container_engine::ContainerEngine;
use crate::container_session::ContainerSession;
use crate::continuation::{resolve_continuation, Continuation, ContinuationController};
use crate::http_probe::HttpProbe;
use crate::ipc::{open_session_channels, ChannelConnector, ChannelSettings};

/// Lifecycle of one profiling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Created,
    MetadataReady,
    Launched,
    Monitoring,
    Completing,
    ShuttingDown,
    Collected,
    Done,
    Cleaned,
    Aborted,
}

/// What to profile and how.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub image: String,
    pub sensor_path: PathBuf,
    pub cmd_port: u16,
    pub evt_port: u16,
    pub channels: ChannelSettings,
    pub continuation: Continuation,
    pub remove_artifacts: bool,
    pub env: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,
    /// Paths the sensor keeps regardless of use.
    pub includes: BTreeSet<String>,
    /// Paths the sensor leaves out.
    pub excludes: BTreeSet<String>,
}

impl SessionOptions {
    pub fn new(image: impl Into<String>, continuation: Continuation) -> Self {
        Self {
            image: image.into(),
            sensor_path: PathBuf::from("/usr/local/bin/slim-sensor"),
            cmd_port: slim_config::DEFAULT_CMD_PORT,
            evt_port: slim_config::DEFAULT_EVT_PORT,
            channels: ChannelSettings::default(),
            continuation,
            remove_artifacts: false,
            env: Vec::new(),
            volume_mounts: Vec::new(),
            includes: BTreeSet::new(),
            excludes: BTreeSet::new(),
        }
    }

    /// Options for `image` from loaded configuration.
    pub fn from_config(config: &Config, image: impl Into<String>) -> Result<Self> {
        let continuation = resolve_continuation(
            &config.continue_after,
            config.continue_after_timeout,
            config.http_probe,
        )?;
        Ok(Self {
            image: image.into(),
            sensor_path: config.sensor_path.clone(),
            cmd_port: config.cmd_port,
            evt_port: config.evt_port,
            channels: ChannelSettings::from_config(config),
            continuation,
            remove_artifacts: config.remove_artifacts,
            env: Vec::new(),
            volume_mounts: config.volume_mounts.clone(),
            includes: config.include_paths.iter().cloned().collect(),
            excludes: config.exclude_paths.iter().cloned().collect(),
        })
    }
}

/// Outcome of a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub image: String,
    pub container_id: String,
    pub state: SessionState,
    pub events: Vec<SensorEvent>,
    /// Best-effort steps that failed without failing the session.
    pub warnings: Vec<String>,
    pub sensor_report: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one image through inspect, launch, observe, shutdown and collect.
///
/// Once the container is launched, shutdown is attempted no matter which
/// later step fails.
pub struct SessionOrchestrator {
    engine: Arc<dyn ContainerEngine>,
    store: Box<dyn ArtifactStore>,
    connector: Arc<dyn ChannelConnector>,
    probe: Option<Arc<dyn HttpProbe>>,
    options: SessionOptions,
    operator_input: Option<Box<dyn AsyncBufRead + Unpin + Send>>,
    state: SessionState,
    history: Vec<SessionState>,
    warnings: Vec<String>,
}

impl SessionOrchestrator {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Box<dyn ArtifactStore>,
        connector: Arc<dyn ChannelConnector>,
        options: SessionOptions,
    ) -> Self {
        Self {
            engine,
            store,
            connector,
            probe: None,
            options,
            operator_input: None,
            state: SessionState::Created,
            history: vec![SessionState::Created],
            warnings: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HttpProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Operator input for the manual continuation, instead of stdin.
    pub fn with_operator_input(mut self, input: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        self.operator_input = Some(Box::new(input));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state the session has been in, in order.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Run the session to completion.
    pub async fn run(&mut self) -> Result<SessionReport> {
        let started_at = Utc::now();
        info!(image = %self.options.image, continuation = %self.options.continuation.mode(), "Profiling session starting");

        match self.drive(started_at).await {
            Ok(report) => {
                info!(image = %report.image, state = ?report.state, warnings = report.warnings.len(), "Profiling session finished");
                Ok(report)
            }
            Err(e) => {
                self.transition(SessionState::Aborted);
                error!(image = %self.options.image, error = %e, "Profiling session aborted");
                Err(e)
            }
        }
    }

    async fn drive(&mut self, started_at: DateTime<Utc>) -> Result<SessionReport> {
        if self.options.continuation == Continuation::Probe && self.probe.is_none() {
            return Err(SlimError::Config(
                "continue-after probe requires an HTTP probe".to_string(),
            ));
        }

        let image = self.engine.inspect_image(&self.options.image).await?;
        let artifact_dir = self.store.prepare(&image)?;
        self.store.process_image_data(&image)?;
        self.transition(SessionState::MetadataReady);

        let spec = LaunchSpec {
            image: image.clone(),
            name: format!("slim-{}", uuid::Uuid::new_v4().simple()),
            sensor_path: self.options.sensor_path.clone(),
            artifact_dir,
            cmd_port: self.options.cmd_port,
            evt_port: self.options.evt_port,
            env: self.options.env.clone(),
            volume_mounts: self.options.volume_mounts.clone(),
        };
        let container = self.engine.launch_container(&spec).await?;
        self.transition(SessionState::Launched);

        let observed = self.observe(&container, &image).await;

        self.transition(SessionState::ShuttingDown);
        if let Err(e) = self.engine.shutdown_container(&container.id).await {
            self.warn(format!("{e}"));
        }
        let events = observed?;
        self.transition(SessionState::Collected);

        let sensor_report = self.store.process_container_data(&container, &events)?;
        self.transition(SessionState::Done);

        if self.options.remove_artifacts {
            match self.store.remove_artifacts() {
                Ok(()) => self.transition(SessionState::Cleaned),
                Err(e) => self.warn(format!("{e}")),
            }
        }

        Ok(SessionReport {
            image: self.options.image.clone(),
            container_id: container.id,
            state: self.state,
            events,
            warnings: self.warnings.clone(),
            sensor_report,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Open the channels, monitor until the continuation fires, then wind
    /// monitoring down. Channels are closed before this returns.
    async fn observe(
        &mut self,
        container: &LaunchedContainer,
        image: &ImageInfo,
    ) -> Result<Vec<SensorEvent>> {
        let (commands, events) = open_session_channels(
            self.connector.as_ref(),
            &container.host,
            container.cmd_port,
            container.evt_port,
            self.options.channels,
        )
        .await?;
        let mut session =
            ContainerSession::new(container.clone(), commands, events, self.options.continuation);
        self.transition(SessionState::Monitoring);

        let monitored = self.monitor(&mut session, image).await;

        self.transition(SessionState::Completing);
        for warning in session.finish_monitoring().await {
            self.warn(warning);
        }
        monitored?;
        Ok(session.into_events())
    }

    async fn monitor(&mut self, session: &mut ContainerSession, image: &ImageInfo) -> Result<()> {
        let mut app = image.app_command().into_iter();
        let start = StartMonitor {
            app_name: app.next().unwrap_or_default(),
            app_args: app.collect(),
            app_workdir: image.working_dir.clone(),
            excludes: self.options.excludes.clone(),
            includes: self.options.includes.clone(),
        };
        session.start_monitoring(start).await?;

        let mut controller = ContinuationController::new(session.continuation);
        if let Some(input) = self.operator_input.take() {
            controller = controller.with_input(input);
        }

        let probe_task = match (&self.probe, session.continuation) {
            (Some(probe), Continuation::Probe) => {
                Some(probe.start(&session.container, controller.notifier())?)
            }
            _ => None,
        };

        let waited = controller.await_completion().await;
        if let Some(task) = probe_task {
            if waited.is_err() {
                task.abort();
            } else {
                match task.await {
                    Ok(summary) if summary.errors > 0 => self.warn(format!(
                        "http probe: {} of {} calls failed",
                        summary.errors, summary.calls
                    )),
                    Ok(summary) => debug!(calls = summary.calls, "HTTP probe calls all answered"),
                    Err(e) => self.warn(format!("http probe task failed: {e}")),
                }
            }
        }
        waited
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
        self.history.push(next);
    }

    fn warn(&mut self, warning: String) {
        warn!(state = ?self.state, warning = %warning, "Session warning");
        self.warnings.push(warning);
    }
}
