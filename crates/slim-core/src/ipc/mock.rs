//! Scripted endpoint for unit tests.
//!
//! Each `send`/`receive` pops the next scripted outcome. Timeout outcomes
//! sleep for the endpoint's deadline first, so paused-clock tests observe the
//! same elapsed time a real socket would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use slim_types::{ChannelError, ChannelRole};

use super::endpoint::{ChannelConnector, Endpoint, EndpointConfig};

/// Outcome of one scripted operation.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Send accepted by the peer.
    Accept,
    /// Receive yields this payload.
    Reply(String),
    SendTimeout,
    RecvTimeout,
    /// Non-timeout transport fault.
    Fail(String),
}

/// What happened on a scripted endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointLog {
    /// Payloads of accepted sends.
    pub sent: Vec<Vec<u8>>,
    /// Payload of every send attempt, accepted or not.
    pub attempted: Vec<Vec<u8>>,
    pub send_attempts: u32,
    pub recv_attempts: u32,
    pub close_calls: u32,
    /// A request was sent while the previous one was still unanswered.
    pub interleaved: bool,
    awaiting_reply: bool,
}

pub struct ScriptedEndpoint {
    config: EndpointConfig,
    sends: VecDeque<Scripted>,
    receives: VecDeque<Scripted>,
    latency: Duration,
    closed: bool,
    log: Arc<Mutex<EndpointLog>>,
}

impl ScriptedEndpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            sends: VecDeque::new(),
            receives: VecDeque::new(),
            latency: Duration::ZERO,
            closed: false,
            log: Arc::new(Mutex::new(EndpointLog::default())),
        }
    }

    /// Command endpoint with 3s deadlines on a dummy address.
    pub fn command() -> Self {
        Self::new(EndpointConfig::command(
            "tcp://127.0.0.1:65501",
            Duration::from_secs(3),
            Duration::from_secs(3),
        ))
    }

    /// Event endpoint with a 120s deadline on a dummy address.
    pub fn event() -> Self {
        Self::new(EndpointConfig::event(
            "tcp://127.0.0.1:65502",
            Duration::from_secs(120),
        ))
    }

    /// Outcomes for successive sends. Unscripted sends are accepted.
    pub fn with_sends(mut self, outcomes: impl IntoIterator<Item = Scripted>) -> Self {
        self.sends.extend(outcomes);
        self
    }

    /// Outcomes for successive receives. Unscripted receives time out.
    pub fn with_receives(mut self, outcomes: impl IntoIterator<Item = Scripted>) -> Self {
        self.receives.extend(outcomes);
        self
    }

    /// Delay applied to every successful operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Shared view of the endpoint's activity.
    pub fn log(&self) -> Arc<Mutex<EndpointLog>> {
        Arc::clone(&self.log)
    }

    fn record<R>(&self, f: impl FnOnce(&mut EndpointLog) -> R) -> R {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut log)
    }

    async fn resolve(&self, outcome: Scripted) -> Result<Option<Vec<u8>>, ChannelError> {
        match outcome {
            Scripted::Accept => {
                tokio::time::sleep(self.latency).await;
                Ok(None)
            }
            Scripted::Reply(text) => {
                tokio::time::sleep(self.latency).await;
                Ok(Some(text.into_bytes()))
            }
            Scripted::SendTimeout => {
                let d = self.config.send_deadline.unwrap_or_default();
                tokio::time::sleep(d).await;
                Err(ChannelError::SendTimeout(d))
            }
            Scripted::RecvTimeout => {
                let d = self.config.recv_deadline.unwrap_or_default();
                tokio::time::sleep(d).await;
                Err(ChannelError::RecvTimeout(d))
            }
            Scripted::Fail(reason) => Err(ChannelError::Transport(reason)),
        }
    }
}

#[async_trait]
impl Endpoint for ScriptedEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        self.record(|log| {
            log.send_attempts += 1;
            log.attempted.push(payload.to_vec());
        });
        if self.closed {
            return Err(ChannelError::Transport("endpoint is closed".to_string()));
        }
        if self.config.role == ChannelRole::EventSubscriber {
            return Err(ChannelError::Transport(
                "event endpoint is receive-only".to_string(),
            ));
        }

        let outcome = self.sends.pop_front().unwrap_or(Scripted::Accept);
        self.resolve(outcome).await?;
        self.record(|log| {
            if log.awaiting_reply {
                log.interleaved = true;
            }
            log.awaiting_reply = true;
            log.sent.push(payload.to_vec());
        });
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.record(|log| log.recv_attempts += 1);
        if self.closed {
            return Err(ChannelError::Transport("endpoint is closed".to_string()));
        }

        let outcome = self.receives.pop_front().unwrap_or(Scripted::RecvTimeout);
        let bytes = self.resolve(outcome).await?.unwrap_or_default();
        self.record(|log| log.awaiting_reply = false);
        Ok(bytes)
    }

    async fn close(&mut self) {
        self.record(|log| log.close_calls += 1);
        self.closed = true;
    }
}

/// Connector handing out pre-built scripted endpoints by role.
///
/// A role with no endpoint left fails to open with a transport error.
#[derive(Default)]
pub struct ScriptedConnector {
    command: Mutex<Option<ScriptedEndpoint>>,
    event: Mutex<Option<ScriptedEndpoint>>,
    opened: Mutex<Vec<EndpointConfig>>,
}

impl ScriptedConnector {
    pub fn new(command: ScriptedEndpoint, event: ScriptedEndpoint) -> Self {
        Self {
            command: Mutex::new(Some(command)),
            event: Mutex::new(Some(event)),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Connector whose event channel opens but whose command channel is refused.
    pub fn events_only(event: ScriptedEndpoint) -> Self {
        Self {
            event: Mutex::new(Some(event)),
            ..Default::default()
        }
    }

    /// Connector whose every open fails.
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// Configurations passed to successful opens, in order.
    pub fn opened(&self) -> Vec<EndpointConfig> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ChannelConnector for ScriptedConnector {
    async fn open(&self, config: EndpointConfig) -> Result<Box<dyn Endpoint>, ChannelError> {
        let slot = match config.role {
            ChannelRole::CommandClient => &self.command,
            ChannelRole::EventSubscriber => &self.event,
        };
        let endpoint = slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| {
                ChannelError::Transport(format!("connection refused: {}", config.address))
            })?;

        let mut endpoint = endpoint;
        endpoint.config.address = config.address.clone();
        endpoint.config.send_deadline = config.send_deadline;
        endpoint.config.recv_deadline = config.recv_deadline;
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(config);
        Ok(Box::new(endpoint))
    }
}
