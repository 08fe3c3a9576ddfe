//! Channel endpoints: one socket bound to one messaging pattern, with deadlines.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use slim_types::{ChannelError, ChannelRole};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqError, ZmqMessage};

use crate::utils::{with_retry, RetryConfig};

/// Deadline for a single dial attempt.
const DIAL_DEADLINE: Duration = Duration::from_secs(5);

/// Build a TCP transport address.
pub fn tcp_address(host: &str, port: u16) -> String {
    format!("tcp://{host}:{port}")
}

/// Address, pattern and deadlines of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub address: String,
    pub role: ChannelRole,
    pub send_deadline: Option<Duration>,
    pub recv_deadline: Option<Duration>,
}

impl EndpointConfig {
    /// Request/reply client with bounded send and receive.
    pub fn command(address: impl Into<String>, send: Duration, recv: Duration) -> Self {
        Self {
            address: address.into(),
            role: ChannelRole::CommandClient,
            send_deadline: Some(send),
            recv_deadline: Some(recv),
        }
    }

    /// Receive-only subscriber.
    pub fn event(address: impl Into<String>, recv: Duration) -> Self {
        Self {
            address: address.into(),
            role: ChannelRole::EventSubscriber,
            send_deadline: None,
            recv_deadline: Some(recv),
        }
    }
}

/// A single IPC socket.
///
/// `close` is idempotent; after it, `send` and `receive` fail with a transport error.
#[async_trait]
pub trait Endpoint: Send {
    fn config(&self) -> &EndpointConfig;

    async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError>;

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError>;

    async fn close(&mut self);
}

/// Opens endpoints for a session.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, config: EndpointConfig) -> Result<Box<dyn Endpoint>, ChannelError>;
}

enum ZmqSocket {
    Req(RequestLoop),
    Sub(SubSocket),
}

/// Reply to the request with the given sequence number.
type Reply = (u64, Result<Vec<u8>, ChannelError>);

struct Outgoing {
    seq: u64,
    payload: Vec<u8>,
    accepted: oneshot::Sender<Result<(), ChannelError>>,
}

/// A request handed to the loop whose acceptance has not been confirmed yet.
struct PendingSend {
    seq: u64,
    payload: Vec<u8>,
    accepted: oneshot::Receiver<Result<(), ChannelError>>,
}

/// REQ socket owned by its own task.
///
/// The task sends one request, then waits for that request's reply for as
/// long as it takes. A deadline that elapses in `send` or `receive` only
/// abandons the wait on the channel, so the next call resumes the same
/// exchange. Replies are tagged with their request's sequence number and
/// replies to superseded requests are dropped.
struct RequestLoop {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    replies: mpsc::UnboundedReceiver<Reply>,
    pending: Option<PendingSend>,
    awaiting: Option<u64>,
    next_seq: u64,
    task: JoinHandle<()>,
}

impl RequestLoop {
    fn spawn(socket: ReqSocket) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_requests(socket, outgoing_rx, replies_tx));
        Self {
            outgoing,
            replies,
            pending: None,
            awaiting: None,
            next_seq: 0,
            task,
        }
    }

    async fn send(&mut self, payload: &[u8], deadline: Option<Duration>) -> Result<(), ChannelError> {
        let mut pending = match self.pending.take() {
            // Retrying a send that timed out: keep waiting on the queued request.
            Some(pending) if pending.payload == payload => pending,
            _ => self.enqueue(payload)?,
        };

        let accepted = match deadline {
            Some(d) => match tokio::time::timeout(d, &mut pending.accepted).await {
                Ok(accepted) => accepted,
                Err(_) => {
                    self.pending = Some(pending);
                    return Err(ChannelError::SendTimeout(d));
                }
            },
            None => (&mut pending.accepted).await,
        };

        match accepted {
            Ok(Ok(())) => {
                self.awaiting = Some(pending.seq);
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(loop_stopped()),
        }
    }

    fn enqueue(&mut self, payload: &[u8]) -> Result<PendingSend, ChannelError> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.awaiting = None;

        let (accepted_tx, accepted) = oneshot::channel();
        self.outgoing
            .send(Outgoing {
                seq,
                payload: payload.to_vec(),
                accepted: accepted_tx,
            })
            .map_err(|_| loop_stopped())?;

        Ok(PendingSend {
            seq,
            payload: payload.to_vec(),
            accepted,
        })
    }

    async fn receive(&mut self, deadline: Option<Duration>) -> Result<Vec<u8>, ChannelError> {
        let Some(seq) = self.awaiting else {
            return Err(ChannelError::Transport(
                "no request awaiting a reply".to_string(),
            ));
        };

        let replies = &mut self.replies;
        let wait = async {
            loop {
                match replies.recv().await {
                    Some((s, reply)) if s == seq => return reply,
                    Some((s, _)) => debug!(seq = s, "Dropping reply to a superseded request"),
                    None => return Err(loop_stopped()),
                }
            }
        };

        let reply = match deadline {
            Some(d) => match tokio::time::timeout(d, wait).await {
                Ok(reply) => reply,
                Err(_) => return Err(ChannelError::RecvTimeout(d)),
            },
            None => wait.await,
        };
        self.awaiting = None;
        reply
    }
}

impl Drop for RequestLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_requests(
    mut socket: ReqSocket,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    replies: mpsc::UnboundedSender<Reply>,
) {
    while let Some(Outgoing {
        seq,
        payload,
        accepted,
    }) = outgoing.recv().await
    {
        let sent = socket
            .send(ZmqMessage::from(payload))
            .await
            .map_err(transport);
        let ok = sent.is_ok();
        let _ = accepted.send(sent);
        if !ok {
            continue;
        }

        let reply = socket.recv().await.map(flatten).map_err(transport);
        if replies.send((seq, reply)).is_err() {
            break;
        }
    }
    let _ = socket.close().await;
}

/// ZeroMQ-backed endpoint (REQ for commands, SUB for events).
pub struct ZmqEndpoint {
    config: EndpointConfig,
    socket: Option<ZmqSocket>,
}

impl ZmqEndpoint {
    /// Dial the configured address once.
    pub async fn connect(config: EndpointConfig) -> Result<Self, ChannelError> {
        let socket = match config.role {
            ChannelRole::CommandClient => {
                let mut socket = ReqSocket::new();
                dial(DIAL_DEADLINE, socket.connect(&config.address)).await?;
                ZmqSocket::Req(RequestLoop::spawn(socket))
            }
            ChannelRole::EventSubscriber => {
                let mut socket = SubSocket::new();
                dial(DIAL_DEADLINE, socket.connect(&config.address)).await?;
                // Subscribe to everything: the sensor publishes bare payloads.
                socket.subscribe("").await.map_err(transport)?;
                ZmqSocket::Sub(socket)
            }
        };

        debug!(address = %config.address, role = %config.role, "Endpoint connected");
        Ok(Self {
            config,
            socket: Some(socket),
        })
    }

    /// Dial with exponential backoff; the sensor may still be starting up.
    pub async fn open(config: EndpointConfig, retry: &RetryConfig) -> Result<Self, ChannelError> {
        let name = format!("{} dial {}", config.role, config.address);
        with_retry(retry, &name, || Self::connect(config.clone())).await
    }
}

#[async_trait]
impl Endpoint for ZmqEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let deadline = self.config.send_deadline;
        match self.socket.as_mut() {
            Some(ZmqSocket::Req(requests)) => requests.send(payload, deadline).await,
            Some(ZmqSocket::Sub(_)) => Err(ChannelError::Transport(
                "event endpoint is receive-only".to_string(),
            )),
            None => Err(closed(self.config.role)),
        }
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        let deadline = self.config.recv_deadline;
        match self.socket.as_mut() {
            Some(ZmqSocket::Req(requests)) => requests.receive(deadline).await,
            Some(ZmqSocket::Sub(socket)) => bounded(deadline, socket.recv(), ChannelError::RecvTimeout)
                .await
                .map(flatten),
            None => Err(closed(self.config.role)),
        }
    }

    async fn close(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        match socket {
            // Dropping the loop aborts its task, which drops the socket.
            ZmqSocket::Req(requests) => drop(requests),
            ZmqSocket::Sub(socket) => {
                let _ = socket.close().await;
            }
        }
        debug!(address = %self.config.address, role = %self.config.role, "Endpoint closed");
    }
}

/// Opens [`ZmqEndpoint`]s, retrying the dial.
#[derive(Debug, Clone, Default)]
pub struct ZmqConnector {
    pub retry: RetryConfig,
}

#[async_trait]
impl ChannelConnector for ZmqConnector {
    async fn open(&self, config: EndpointConfig) -> Result<Box<dyn Endpoint>, ChannelError> {
        let endpoint = ZmqEndpoint::open(config, &self.retry).await?;
        Ok(Box::new(endpoint))
    }
}

fn closed(role: ChannelRole) -> ChannelError {
    ChannelError::Transport(format!("{role} endpoint is closed"))
}

fn transport(err: ZmqError) -> ChannelError {
    ChannelError::Transport(err.to_string())
}

fn loop_stopped() -> ChannelError {
    ChannelError::Transport("command socket task has stopped".to_string())
}

fn flatten(message: ZmqMessage) -> Vec<u8> {
    let mut bytes = Vec::new();
    for frame in message.into_vec() {
        bytes.extend_from_slice(&frame);
    }
    bytes
}

async fn dial(
    deadline: Duration,
    fut: impl Future<Output = Result<(), ZmqError>>,
) -> Result<(), ChannelError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(transport),
        Err(_) => Err(ChannelError::Transport(format!(
            "dial did not complete within {deadline:?}"
        ))),
    }
}

async fn bounded<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = Result<T, ZmqError>>,
    on_timeout: fn(Duration) -> ChannelError,
) -> Result<T, ChannelError> {
    match deadline {
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(result) => result.map_err(transport),
            Err(_) => Err(on_timeout(d)),
        },
        None => fut.await.map_err(transport),
    }
}
