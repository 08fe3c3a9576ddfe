//! Sensor IPC: a request/reply command channel and a subscribe-all event channel.

pub mod command;
pub mod endpoint;
pub mod event;
#[cfg(test)]
pub mod mock;

use std::time::Duration;

use slim_config::Config;
use slim_types::ChannelError;
use tracing::{info, warn};

pub use command::{CommandChannel, COMMAND_TIMEOUT_RETRIES};
pub use endpoint::{tcp_address, ChannelConnector, Endpoint, EndpointConfig, ZmqConnector, ZmqEndpoint};
pub use event::EventChannel;

/// Deadlines applied to the two session channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub cmd_send_deadline: Duration,
    pub cmd_recv_deadline: Duration,
    pub evt_recv_deadline: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            cmd_send_deadline: Duration::from_secs(3),
            cmd_recv_deadline: Duration::from_secs(3),
            evt_recv_deadline: Duration::from_secs(120),
        }
    }
}

impl ChannelSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cmd_send_deadline: Duration::from_secs(config.cmd_send_timeout_secs),
            cmd_recv_deadline: Duration::from_secs(config.cmd_recv_timeout_secs),
            evt_recv_deadline: Duration::from_secs(config.evt_recv_timeout_secs),
        }
    }
}

/// Open the event channel, then the command channel.
///
/// If the command channel cannot be opened the already-open event channel is
/// closed before the error is returned.
pub async fn open_session_channels(
    connector: &dyn ChannelConnector,
    host: &str,
    cmd_port: u16,
    evt_port: u16,
    settings: ChannelSettings,
) -> Result<(CommandChannel, EventChannel), ChannelError> {
    let evt_addr = tcp_address(host, evt_port);
    let evt = connector
        .open(EndpointConfig::event(&evt_addr, settings.evt_recv_deadline))
        .await?;
    let mut events = EventChannel::new(evt);

    let cmd_addr = tcp_address(host, cmd_port);
    let cmd = match connector
        .open(EndpointConfig::command(
            &cmd_addr,
            settings.cmd_send_deadline,
            settings.cmd_recv_deadline,
        ))
        .await
    {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(address = %cmd_addr, error = %e, "Command channel failed to open");
            events.close().await;
            return Err(e);
        }
    };

    info!(cmd = %cmd_addr, evt = %evt_addr, "Sensor channels open");
    Ok((CommandChannel::new(cmd), events))
}
