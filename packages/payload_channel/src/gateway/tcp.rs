//! Length-prefixed messages over a plain TCP socket.
//!
//! Wire format: `[4-byte big-endian length][bytes]`
//!
//! After connecting, the client sends one JSON message
//! `{"principal", "credential", "client_id"}` and waits for
//! `{"authenticated": bool, "reason"?}`. Every message after a successful
//! reply is an authenticated command.
//!
//! A `TcpGateway` is single-use: once disconnected it is dropped and the
//! session builds a new one.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Gateway, GatewayConnector, GatewayEvent};
use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Maximum message size (1 MiB). Rejects messages larger than this.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct AuthRequest<'a> {
    principal: &'a str,
    credential: &'a str,
    client_id: String,
}

#[derive(Deserialize)]
struct AuthResponse {
    authenticated: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Write one length-prefixed message.
pub async fn write_message<W>(stream: &mut W, bytes: &[u8]) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin,
{
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(GatewayError::MessageTooLarge {
            len: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let len = (bytes.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed message.
///
/// Returns `None` if the peer closed the stream between messages.
pub async fn read_message<R>(stream: &mut R) -> Result<Option<Vec<u8>>, GatewayError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(GatewayError::MessageTooLarge {
            len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Opens [`TcpGateway`]s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    auth_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

impl TcpConnector {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::default()
            .with_connect_timeout(config.connect_timeout())
            .with_auth_timeout(config.auth_timeout())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on the whole auth request/reply exchange.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }
}

impl GatewayConnector for TcpConnector {
    type Gateway = TcpGateway;

    fn open(&self, host: &str, port: u16, events: mpsc::Sender<GatewayEvent>) -> TcpGateway {
        TcpGateway {
            host: host.to_string(),
            port,
            client_id: Uuid::new_v4(),
            connect_timeout: self.connect_timeout,
            auth_timeout: self.auth_timeout,
            events,
            read_half: None,
            write_half: None,
            reader: None,
            connected: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }
}

pub struct TcpGateway {
    host: String,
    port: u16,
    /// Identifies this client to the gateway; fresh per connection.
    client_id: Uuid,
    connect_timeout: Duration,
    auth_timeout: Duration,
    events: mpsc::Sender<GatewayEvent>,
    read_half: Option<OwnedReadHalf>,
    write_half: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TcpGateway {
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }
}

impl Gateway for TcpGateway {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        if self.is_connected() {
            return Ok(());
        }

        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| {
            GatewayError::Connect(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })?
        .map_err(GatewayError::Connect)?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        self.read_half = Some(read_half);
        self.write_half = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        debug!(
            host = %self.host,
            port = self.port,
            client_id = %self.client_id,
            "gateway connected"
        );
        let _ = self.events.try_send(GatewayEvent::Connection(true));
        Ok(())
    }

    async fn authenticate(&mut self, principal: &str, credential: &str) -> Result<(), GatewayError> {
        let request = serde_json::to_vec(&AuthRequest {
            principal,
            credential,
            client_id: self.client_id.to_string(),
        })
        .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let write_half = self.write_half.as_mut().ok_or(GatewayError::NotConnected)?;
        let mut read_half = self.read_half.take().ok_or(GatewayError::NotConnected)?;

        let exchange = async {
            write_message(write_half, &request).await?;
            read_message(&mut read_half).await
        };
        let reply = tokio::time::timeout(self.auth_timeout, exchange)
            .await
            .map_err(|_| {
                GatewayError::Auth(format!(
                    "no reply within {}ms",
                    self.auth_timeout.as_millis()
                ))
            })??
            .ok_or(GatewayError::Closed)?;
        let reply: AuthResponse =
            serde_json::from_slice(&reply).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        if !reply.authenticated {
            return Err(GatewayError::Auth(
                reply.reason.unwrap_or_else(|| "rejected".to_string()),
            ));
        }

        debug!(client_id = %self.client_id, principal = %principal, "gateway authenticated");

        self.reader = Some(tokio::spawn(read_commands(
            read_half,
            self.events.clone(),
            self.connected.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.read_half = None;
        if let Some(mut write_half) = self.write_half.take() {
            let _ = write_half.shutdown().await;
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(client_id = %self.client_id, "gateway disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reader task: socket → `GatewayEvent::Command`, then `Connection(false)`
/// when the link drops.
async fn read_commands(
    mut read_half: OwnedReadHalf,
    events: mpsc::Sender<GatewayEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = read_message(&mut read_half) => msg,
        };
        match next {
            Ok(Some(data)) => {
                if events.send(GatewayEvent::Command(data)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("gateway stream closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "gateway read error");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    if !cancel.is_cancelled() {
        let _ = events.send(GatewayEvent::Connection(false)).await;
    }
}
