//! Authenticated transport seam.
//!
//! A [`Gateway`] owns one socket to a channel port. It reports connection
//! changes and authenticated commands as [`GatewayEvent`]s on the channel it
//! was opened with, from its own I/O task.
//!
//! Submodules:
//! - `tcp`: length-prefixed TCP transport used by the `payload-tail` binary

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::GatewayError;

mod tcp;

pub use tcp::{MAX_MESSAGE_SIZE, TcpConnector, TcpGateway, read_message, write_message};

/// Notification delivered by a gateway's I/O task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Connection state changed; `false` means the link is gone.
    Connection(bool),
    /// Data of one authenticated command.
    Command(Vec<u8>),
}

pub trait Gateway: Send + 'static {
    fn connect(&mut self) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn authenticate(
        &mut self,
        principal: &str,
        credential: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Close the link. Safe to call when not connected; never fails.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;
}

/// Builds unconnected gateways for a host and port.
pub trait GatewayConnector: Send + Sync + 'static {
    type Gateway: Gateway;

    fn open(&self, host: &str, port: u16, events: mpsc::Sender<GatewayEvent>) -> Self::Gateway;
}
