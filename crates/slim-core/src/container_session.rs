use slim_types::{
    CommandMessage, LaunchedContainer, Result, SensorEvent, StartMonitor, EVT_MONITOR_FINISH_ERROR,
};
use tracing::{debug, info, warn};

use crate::continuation::Continuation;
use crate::ipc::{CommandChannel, EventChannel};

/// Monitoring progress of a [`ContainerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    /// Channels open, sensor not yet told to monitor.
    Connected,
    /// Sensor acknowledged the start-monitor command.
    Monitoring,
    /// Monitoring wound down, channels closed.
    Finished,
}

/// A launched container together with the sensor channels that observe it.
///
/// Owns both channels exclusively; they are closed exactly once through
/// [`ContainerSession::finish_monitoring`] or [`ContainerSession::close`].
pub struct ContainerSession {
    pub session_id: String,
    pub container: LaunchedContainer,
    pub continuation: Continuation,
    commands: CommandChannel,
    events: EventChannel,
    status: MonitorStatus,
    collected: Vec<SensorEvent>,
    closed: bool,
}

impl ContainerSession {
    pub fn new(
        container: LaunchedContainer,
        commands: CommandChannel,
        events: EventChannel,
        continuation: Continuation,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4()
            .to_string()
            .split('-')
            .next()
            .unwrap_or("0000")
            .to_string();

        Self {
            session_id,
            container,
            continuation,
            commands,
            events,
            status: MonitorStatus::Connected,
            collected: Vec::new(),
            closed: false,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.status
    }

    /// Events received from the sensor so far.
    pub fn events(&self) -> &[SensorEvent] {
        &self.collected
    }

    pub fn into_events(self) -> Vec<SensorEvent> {
        self.collected
    }

    /// Tell the sensor to start monitoring the target application.
    pub async fn start_monitoring(&mut self, start: StartMonitor) -> Result<String> {
        let app = start.app_name.clone();
        let reply = self
            .commands
            .send_command(&CommandMessage::StartMonitor(start))
            .await?;
        self.status = MonitorStatus::Monitoring;
        info!(session = %self.session_id, app = %app, reply = %reply, "Sensor monitoring started");
        Ok(reply)
    }

    /// Stop monitoring, wait for the sensor's completion event and close the
    /// channels. Every failure here is returned as a warning.
    pub async fn finish_monitoring(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.status == MonitorStatus::Monitoring {
            match self.commands.send_command(&CommandMessage::StopMonitor).await {
                Ok(reply) => debug!(session = %self.session_id, reply = %reply, "Stop-monitor acknowledged"),
                Err(e) => {
                    warn!(session = %self.session_id, error = %e, "Stop-monitor command failed");
                    warnings.push(format!("stop-monitor command failed: {e}"));
                }
            }

            match self.events.next_event().await {
                Ok(event) if event == EVT_MONITOR_FINISH_ERROR => {
                    warn!(session = %self.session_id, "Sensor could not finish monitoring");
                    warnings.push(format!("sensor reported {event}"));
                    self.collected.push(SensorEvent::new(event));
                }
                Ok(event) => {
                    info!(session = %self.session_id, event = %event, "Sensor finished monitoring");
                    self.collected.push(SensorEvent::new(event));
                }
                Err(e) if e.is_timeout() => {
                    warn!(session = %self.session_id, error = %e, "No event from the sensor");
                    warnings.push(format!("waiting for sensor event: {e}"));
                }
                Err(e) => {
                    warn!(session = %self.session_id, error = %e, "Event channel failed");
                    warnings.push(format!("event channel failed: {e}"));
                }
            }
        }

        self.close().await;
        self.status = MonitorStatus::Finished;
        warnings
    }

    /// Close both channels. Later calls do nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.commands.close().await;
        self.events.close().await;
        debug!(session = %self.session_id, "Sensor channels closed");
    }
}

#[cfg(test)]
mod tests {
    use slim_types::EVT_MONITOR_FINISH_COMPLETED;

    use super::*;
    use crate::ipc::mock::{Scripted, ScriptedEndpoint};

    fn session(cmd: ScriptedEndpoint, evt: ScriptedEndpoint) -> ContainerSession {
        ContainerSession::new(
            LaunchedContainer {
                id: "c0ffee".to_string(),
                ..Default::default()
            },
            CommandChannel::new(Box::new(cmd)),
            EventChannel::new(Box::new(evt)),
            Continuation::Manual,
        )
    }

    fn start() -> StartMonitor {
        StartMonitor {
            app_name: "/usr/sbin/nginx".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_monitoring_cycle() {
        let cmd = ScriptedEndpoint::command().with_receives([
            Scripted::Reply("ok".into()),
            Scripted::Reply("ok".into()),
        ]);
        let evt = ScriptedEndpoint::event()
            .with_receives([Scripted::Reply(EVT_MONITOR_FINISH_COMPLETED.into())]);
        let (cmd_log, evt_log) = (cmd.log(), evt.log());
        let mut session = session(cmd, evt);

        assert_eq!(session.start_monitoring(start()).await.unwrap(), "ok");
        assert_eq!(session.status(), MonitorStatus::Monitoring);

        let warnings = session.finish_monitoring().await;
        assert!(warnings.is_empty());
        assert_eq!(session.status(), MonitorStatus::Finished);
        assert_eq!(session.events()[0].payload, EVT_MONITOR_FINISH_COMPLETED);

        let sent: Vec<_> = cmd_log
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|b| CommandMessage::decode(b).unwrap().name())
            .collect();
        assert_eq!(sent, vec!["cmd.monitor.start", "cmd.monitor.stop"]);
        assert_eq!(cmd_log.lock().unwrap().close_calls, 1);
        assert_eq!(evt_log.lock().unwrap().close_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_failures_become_warnings() {
        let cmd = ScriptedEndpoint::command()
            .with_receives([Scripted::Reply("ok".into()), Scripted::Fail("reset".into())]);
        let evt = ScriptedEndpoint::event().with_receives([Scripted::RecvTimeout]);
        let mut session = session(cmd, evt);

        session.start_monitoring(start()).await.unwrap();
        let warnings = session.finish_monitoring().await;
        assert_eq!(warnings.len(), 2);
        assert!(session.events().is_empty());
        assert_eq!(session.status(), MonitorStatus::Finished);
    }

    #[tokio::test]
    async fn sensor_finish_error_is_recorded_as_warning() {
        let cmd = ScriptedEndpoint::command()
            .with_receives([Scripted::Reply("ok".into()), Scripted::Reply("ok".into())]);
        let evt = ScriptedEndpoint::event()
            .with_receives([Scripted::Reply(EVT_MONITOR_FINISH_ERROR.into())]);
        let mut session = session(cmd, evt);

        session.start_monitoring(start()).await.unwrap();
        let warnings = session.finish_monitoring().await;
        assert_eq!(warnings, vec![format!("sensor reported {EVT_MONITOR_FINISH_ERROR}")]);
        assert_eq!(session.events().len(), 1);
    }

    #[tokio::test]
    async fn finish_without_start_only_closes() {
        let cmd = ScriptedEndpoint::command();
        let cmd_log = cmd.log();
        let mut session = session(cmd, ScriptedEndpoint::event());

        assert!(session.finish_monitoring().await.is_empty());
        session.close().await;
        let log = cmd_log.lock().unwrap();
        assert_eq!(log.send_attempts, 0);
        assert_eq!(log.close_calls, 1);
    }
}
