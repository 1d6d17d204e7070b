//! Shared fixtures for unit tests: a mock channel broker, a scripted gateway,
//! and a recording receiver host.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{BrokerConfig, DEFAULT_CHANNEL_PATH};
use crate::error::{GatewayError, SessionError};
use crate::event::LogEvent;
use crate::framing::{BROADCAST, encode};
use crate::gateway::{Gateway, GatewayConnector, GatewayEvent};
use crate::receiver::ReceiverHost;
use crate::session::SessionState;

const WAIT: Duration = Duration::from_secs(5);

/// Await `fut`, panicking if it takes longer than a few seconds.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

pub async fn recv_event(rx: &mut mpsc::Receiver<LogEvent>) -> LogEvent {
    within(rx.recv()).await.expect("event channel closed")
}

pub async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, want: SessionState) {
    within(rx.wait_for(|s| *s == want))
        .await
        .expect("state sender dropped");
}

/// A broadcast frame carrying a well-formed log event with `message`.
pub fn broadcast_frame(message: &str) -> Vec<u8> {
    let payload = serde_json::json!({
        "name": "root",
        "message": message,
        "level": "INFO",
        "threadName": "main",
        "time": 1_700_000_000_000_i64,
    });
    encode(BROADCAST, payload.to_string().as_bytes())
}

// =============================================================================
// Mock broker
// =============================================================================

#[derive(Clone, Copy, Debug)]
pub enum BrokerBehavior {
    /// Answer `{"port": N}`, incrementing N on every request.
    Assign { first_port: u16 },
    /// Answer 200 with a body that is not an assignment.
    Garbage,
}

struct BrokerState {
    password: String,
    behavior: BrokerBehavior,
    next_port: AtomicU16,
    requests: Mutex<Vec<(String, String)>>,
}

#[derive(Deserialize)]
struct ChannelQuery {
    channel: String,
    password: String,
}

async fn channel_handler(
    State(state): State<Arc<BrokerState>>,
    Query(query): Query<ChannelQuery>,
) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push((query.channel, query.password.clone()));

    if query.password != state.password {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.behavior {
        BrokerBehavior::Assign { .. } => {
            let port = state.next_port.fetch_add(1, Ordering::SeqCst);
            Json(serde_json::json!({ "port": port })).into_response()
        }
        BrokerBehavior::Garbage => "no ports today".into_response(),
    }
}

/// Channel broker on `127.0.0.1:0`.
pub struct MockBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    task: JoinHandle<()>,
}

impl MockBroker {
    pub async fn start(password: &str, behavior: BrokerBehavior) -> Self {
        let first_port = match behavior {
            BrokerBehavior::Assign { first_port } => first_port,
            BrokerBehavior::Garbage => 0,
        };
        let state = Arc::new(BrokerState {
            password: password.to_string(),
            behavior,
            next_port: AtomicU16::new(first_port),
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route(DEFAULT_CHANNEL_PATH, get(channel_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state, task }
    }

    /// Broker settings pointing at this mock (plain http).
    pub fn config(&self) -> BrokerConfig {
        BrokerConfig {
            scheme: "http".to_string(),
            port: self.addr.port(),
            path: DEFAULT_CHANNEL_PATH.to_string(),
            timeout_secs: 5,
        }
    }

    /// `(channel, password)` of every request received so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Scripted gateway
// =============================================================================

/// How the next gateways opened by a [`ScriptedConnector`] behave.
#[derive(Clone, Debug, Default)]
pub struct GatewayScript {
    pub fail_connect: bool,
    pub reject_auth: bool,
    pub connect_delay: Option<Duration>,
}

/// Bookkeeping shared by a connector and every gateway it opened.
#[derive(Default)]
pub struct GatewayLab {
    script: Mutex<GatewayScript>,
    opened: Mutex<Vec<u16>>,
    links: Mutex<Vec<mpsc::Sender<GatewayEvent>>>,
    auths: Mutex<Vec<(String, String)>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl GatewayLab {
    pub fn set_script(&self, script: GatewayScript) {
        *self.script.lock().unwrap() = script;
    }

    /// Ports of every gateway opened, in order.
    pub fn opened_ports(&self) -> Vec<u16> {
        self.opened.lock().unwrap().clone()
    }

    /// Gateways currently connected.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously connected gateways seen.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn auths(&self) -> Vec<(String, String)> {
        self.auths.lock().unwrap().clone()
    }

    /// Event channel of the `i`th gateway opened, for injecting events.
    pub fn link(&self, i: usize) -> mpsc::Sender<GatewayEvent> {
        self.links.lock().unwrap()[i].clone()
    }

    pub async fn wait_for_opened(&self, n: usize) {
        within(async {
            while self.opened.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }

    pub async fn wait_for_live(&self, n: usize) {
        within(async {
            while self.live() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }

    fn enter(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    lab: Arc<GatewayLab>,
}

impl ScriptedConnector {
    pub fn new(script: GatewayScript) -> Self {
        let lab = GatewayLab::default();
        lab.set_script(script);
        Self { lab: Arc::new(lab) }
    }

    pub fn lab(&self) -> Arc<GatewayLab> {
        self.lab.clone()
    }
}

impl GatewayConnector for ScriptedConnector {
    type Gateway = ScriptedGateway;

    fn open(&self, _host: &str, port: u16, events: mpsc::Sender<GatewayEvent>) -> ScriptedGateway {
        self.lab.opened.lock().unwrap().push(port);
        self.lab.links.lock().unwrap().push(events.clone());
        ScriptedGateway {
            lab: self.lab.clone(),
            script: self.lab.script.lock().unwrap().clone(),
            events,
            connected: false,
        }
    }
}

pub struct ScriptedGateway {
    lab: Arc<GatewayLab>,
    script: GatewayScript,
    events: mpsc::Sender<GatewayEvent>,
    connected: bool,
}

impl ScriptedGateway {
    fn release(&mut self) {
        if self.connected {
            self.connected = false;
            self.lab.leave();
        }
    }
}

impl Gateway for ScriptedGateway {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        if let Some(delay) = self.script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_connect {
            return Err(GatewayError::Connect(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            )));
        }
        self.connected = true;
        self.lab.enter();
        let _ = self.events.try_send(GatewayEvent::Connection(true));
        Ok(())
    }

    async fn authenticate(&mut self, principal: &str, credential: &str) -> Result<(), GatewayError> {
        if !self.connected {
            return Err(GatewayError::NotConnected);
        }
        self.lab
            .auths
            .lock()
            .unwrap()
            .push((principal.to_string(), credential.to_string()));
        if self.script.reject_auth {
            return Err(GatewayError::Auth("scripted rejection".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.release();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for ScriptedGateway {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Recording host
// =============================================================================

/// Host that forwards appended events and start failures to channels.
pub struct RecordingHost {
    events: mpsc::UnboundedSender<LogEvent>,
    failures: mpsc::UnboundedSender<&'static str>,
}

impl RecordingHost {
    /// Host plus receivers for its events and failure codes.
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<LogEvent>,
        mpsc::UnboundedReceiver<&'static str>,
    ) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (failures, failures_rx) = mpsc::unbounded_channel();
        (Self { events, failures }, events_rx, failures_rx)
    }
}

impl ReceiverHost for RecordingHost {
    fn append(&self, event: LogEvent) {
        let _ = self.events.send(event);
    }

    fn start_failed(&self, error: &SessionError) {
        let _ = self.failures.send(error.error_code());
    }
}
