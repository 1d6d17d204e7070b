//! Payload Channel - remote log-event ingestion over a broker-negotiated socket
//!
//! A receiver asks a broker for the port of a named channel, opens an
//! authenticated gateway session to that port, demultiplexes the binary frames
//! it receives, decodes the broadcast ones into [`LogEvent`]s and hands each
//! event to a local [`ReceiverHost`]. When the gateway reports itself
//! disconnected, the session is torn down and rebuilt from scratch.
//!
//! ```text
//!  SessionLifecycleController ──start()──▶ RestartSupervisor
//!                                               │ build / destroy
//!                                               ▼
//!                                         GatewaySession
//!                     negotiate ◀───────────────┤
//!                 (ChannelNegotiator)            │ connect + authenticate
//!                                               ▼
//!                                            Gateway ──GatewayEvent──▶ demux ──▶ decode
//!                                                                                  │
//!  ReceiverHost::append ◀──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use payload_channel::{
//!     LogEvent, ReceiverConfig, ReceiverHost, SessionLifecycleController, TcpConnector,
//! };
//!
//! struct Printer;
//!
//! impl ReceiverHost for Printer {
//!     fn append(&self, event: LogEvent) {
//!         println!("{} {}", event.level, event.message);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config = ReceiverConfig::default();
//!     config.credentials.guid = "my-channel".to_string();
//!     config.credentials.password = "secret".to_string();
//!
//!     let receiver = SessionLifecycleController::new(TcpConnector::default(), Printer, config);
//!     receiver.start().await.unwrap();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     receiver.shutdown().await;
//! }
//! ```

pub mod config;
mod error;
pub mod event;
pub mod framing;
pub mod gateway;
pub mod negotiator;
pub mod receiver;
pub mod session;
pub mod supervisor;

#[cfg(test)]
mod test_helpers;

pub use config::{BrokerConfig, ChannelCredentials, GatewayConfig, ReceiverConfig, RestartPolicy};
pub use error::{
    DecodeError, FrameError, GatewayError, NegotiationError, ReceiverError, SessionError,
};
pub use event::{LogEvent, decode};
pub use framing::{BROADCAST, Demuxed, Frame, demux};
pub use gateway::{Gateway, GatewayConnector, GatewayEvent, TcpConnector, TcpGateway};
pub use negotiator::{ChannelAssignment, ChannelNegotiator};
pub use receiver::{ReceiverHost, SessionLifecycleController};
pub use session::{GatewaySession, SessionState};
pub use supervisor::{FailureSignal, RestartSupervisor, SupervisedSession};
