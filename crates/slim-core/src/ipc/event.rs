use slim_types::ChannelError;
use tracing::debug;

use super::endpoint::Endpoint;

/// Receive-only channel carrying asynchronous sensor notifications.
pub struct EventChannel {
    endpoint: Box<dyn Endpoint>,
}

impl EventChannel {
    pub fn new(endpoint: Box<dyn Endpoint>) -> Self {
        Self { endpoint }
    }

    pub fn address(&self) -> &str {
        &self.endpoint.config().address
    }

    /// Block for the next event, up to the receive deadline.
    ///
    /// A timeout comes back as [`ChannelError::RecvTimeout`]; the caller decides
    /// whether to wait again.
    pub async fn next_event(&mut self) -> Result<String, ChannelError> {
        let bytes = self.endpoint.receive().await?;
        let event = String::from_utf8_lossy(&bytes).into_owned();
        debug!(event = %event, "Sensor event received");
        Ok(event)
    }

    pub async fn close(&mut self) {
        self.endpoint.close().await;
    }
}
