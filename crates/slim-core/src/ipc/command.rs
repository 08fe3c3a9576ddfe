use slim_types::{ChannelError, CommandMessage};
use tracing::{debug, info, warn};

use super::endpoint::Endpoint;
use crate::utils::RetryBudget;

/// Timeouts tolerated per direction before a command gives up (4 attempts total).
pub const COMMAND_TIMEOUT_RETRIES: u32 = 3;

/// Request/reply channel used to push control commands into the sensor.
///
/// `send_command` takes `&mut self`, so a second command cannot be dispatched
/// while a reply is outstanding.
pub struct CommandChannel {
    endpoint: Box<dyn Endpoint>,
}

impl CommandChannel {
    pub fn new(endpoint: Box<dyn Endpoint>) -> Self {
        Self { endpoint }
    }

    pub fn address(&self) -> &str {
        &self.endpoint.config().address
    }

    /// Send a command and return the sensor's reply verbatim.
    ///
    /// Send and receive timeouts draw on separate budgets. Encode failures and
    /// non-timeout transport faults are returned without retrying.
    pub async fn send_command(&mut self, cmd: &CommandMessage) -> Result<String, ChannelError> {
        debug!(command = %cmd, "send_command");

        let payload = cmd.encode().map_err(|e| {
            info!(command = %cmd, error = %e, "Malformed command");
            e
        })?;

        let mut send_budget = RetryBudget::new(COMMAND_TIMEOUT_RETRIES);
        loop {
            match self.endpoint.send(&payload).await {
                Ok(()) => break,
                Err(err @ ChannelError::SendTimeout(_)) => {
                    if !send_budget.record_timeout() {
                        warn!(command = %cmd, timeouts = send_budget.spent(), "Command send timed out, giving up");
                        return Err(err);
                    }
                    info!(command = %cmd, timeouts = send_budget.spent(), "Command send timeout, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        let mut recv_budget = RetryBudget::new(COMMAND_TIMEOUT_RETRIES);
        let reply = loop {
            match self.endpoint.receive().await {
                Ok(bytes) => break bytes,
                Err(err @ ChannelError::RecvTimeout(_)) => {
                    if !recv_budget.record_timeout() {
                        warn!(command = %cmd, timeouts = recv_budget.spent(), "Command reply timed out, giving up");
                        return Err(err);
                    }
                    info!(command = %cmd, timeouts = recv_budget.spent(), "Command receive timeout, retrying");
                }
                Err(err) => return Err(err),
            }
        };

        let reply = String::from_utf8_lossy(&reply).into_owned();
        debug!(command = %cmd, reply = %reply, "Command acknowledged");
        Ok(reply)
    }

    /// Release the socket. Safe to call more than once.
    pub async fn close(&mut self) {
        self.endpoint.close().await;
    }
}
