//! GatewaySession: one negotiate → connect → authenticate → listen attempt.
//!
//! A session never retries. Any failure while starting is returned to the
//! supervisor, which destroys the session and decides when to build another.
//! Once started, a pump task turns gateway events into log events and fires
//! the session's [`FailureSignal`] the first time the gateway reports the
//! link down.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ChannelCredentials;
use crate::error::{GatewayError, SessionError};
use crate::event::{LogEvent, decode};
use crate::framing::{Demuxed, demux};
use crate::gateway::{Gateway, GatewayConnector, GatewayEvent};
use crate::negotiator::{ChannelAssignment, ChannelNegotiator};
use crate::supervisor::{FailureSignal, SupervisedSession};

/// Capacity of the gateway → pump event channel.
const GATEWAY_EVENT_CAPACITY: usize = 256;

/// Lifecycle state of a receiver's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Negotiating,
    Connecting,
    Authenticating,
    Active,
    Disconnected,
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Stopped => "stopped",
            SessionState::Negotiating => "negotiating",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Active => "active",
            SessionState::Disconnected => "disconnected",
            SessionState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Publish a state from inside a session or the supervisor.
///
/// Once the controller has published `ShuttingDown`, only the controller
/// moves the state on, so a build still in flight cannot mask the shutdown.
pub(crate) fn report_state(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if *current == SessionState::ShuttingDown {
            return false;
        }
        *current = next;
        true
    });
}

/// Inputs shared by every session a receiver builds.
pub struct SessionSetup<C> {
    /// Receiver name, for log fields.
    pub receiver: String,
    pub credentials: ChannelCredentials,
    pub negotiator: ChannelNegotiator,
    pub connector: Arc<C>,
    /// Where decoded events go.
    pub events: mpsc::Sender<LogEvent>,
    pub state: Arc<watch::Sender<SessionState>>,
}

impl<C> Clone for SessionSetup<C> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            credentials: self.credentials.clone(),
            negotiator: self.negotiator.clone(),
            connector: self.connector.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
        }
    }
}

pub struct GatewaySession<C: GatewayConnector> {
    id: Uuid,
    setup: SessionSetup<C>,
    failure: FailureSignal,
    assignment: Option<ChannelAssignment>,
    gateway: Option<C::Gateway>,
    pump: Option<JoinHandle<()>>,
}

impl<C: GatewayConnector> GatewaySession<C> {
    pub fn new(setup: SessionSetup<C>, failure: FailureSignal) -> Self {
        Self {
            id: Uuid::new_v4(),
            setup,
            failure,
            assignment: None,
            gateway: None,
            pump: None,
        }
    }

    /// Port assigned by the broker, once negotiated.
    pub fn assignment(&self) -> Option<ChannelAssignment> {
        self.assignment
    }

    pub fn is_connected(&self) -> bool {
        self.gateway.as_ref().is_some_and(|g| g.is_connected())
    }

    /// Negotiate, connect, wire the pump, then authenticate.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.report(SessionState::Negotiating);
        let assignment = self
            .setup
            .negotiator
            .negotiate(&self.setup.credentials)
            .await?;
        self.assignment = Some(assignment);
        info!(
            receiver = %self.setup.receiver,
            session_id = %self.id,
            port = assignment.port,
            "channel negotiated"
        );

        self.report(SessionState::Connecting);
        let (gateway_tx, gateway_rx) = mpsc::channel(GATEWAY_EVENT_CAPACITY);
        let gateway = self.gateway.insert(self.setup.connector.open(
            &self.setup.credentials.host,
            assignment.port,
            gateway_tx,
        ));
        gateway.connect().await?;

        self.pump = Some(tokio::spawn(pump(
            self.setup.receiver.clone(),
            self.id,
            gateway_rx,
            self.setup.events.clone(),
            std::mem::take(&mut self.failure),
        )));

        self.report(SessionState::Authenticating);
        let gateway = self.gateway.as_mut().ok_or(GatewayError::NotConnected)?;
        gateway
            .authenticate(&self.setup.credentials.guid, &self.setup.credentials.password)
            .await?;

        info!(
            receiver = %self.setup.receiver,
            session_id = %self.id,
            "session authenticated"
        );
        Ok(())
    }

    /// Stop the pump and disconnect the gateway. Safe to call repeatedly.
    pub async fn destroy(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut gateway) = self.gateway.take() {
            gateway.disconnect().await;
            debug!(
                receiver = %self.setup.receiver,
                session_id = %self.id,
                "session destroyed"
            );
        }
    }

    fn report(&self, state: SessionState) {
        report_state(&self.setup.state, state);
    }
}

impl<C: GatewayConnector> Drop for GatewaySession<C> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl<C: GatewayConnector> SupervisedSession for GatewaySession<C> {
    async fn start(&mut self) -> Result<(), SessionError> {
        GatewaySession::start(self).await
    }

    async fn destroy(&mut self) {
        GatewaySession::destroy(self).await
    }
}

/// Gateway events → demux → decode → event sink.
async fn pump(
    receiver: String,
    session_id: Uuid,
    mut inbound: mpsc::Receiver<GatewayEvent>,
    events: mpsc::Sender<LogEvent>,
    mut failure: FailureSignal,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            GatewayEvent::Connection(true) => {
                debug!(receiver = %receiver, session_id = %session_id, "gateway connected");
            }
            GatewayEvent::Connection(false) => {
                if failure.fire() {
                    info!(
                        receiver = %receiver,
                        session_id = %session_id,
                        "gateway reported not connected"
                    );
                }
            }
            GatewayEvent::Command(data) => {
                let Some(event) = handle_command(&data, session_id) else {
                    continue;
                };
                if events.send(event).await.is_err() {
                    debug!(session_id = %session_id, "event sink closed");
                    return;
                }
            }
        }
    }

    if failure.fire() {
        info!(receiver = %receiver, session_id = %session_id, "gateway event stream ended");
    }
}

/// Extract a log event from one authenticated command, if it carries one.
/// Bad frames and payloads are logged and dropped; the session carries on.
fn handle_command(data: &[u8], session_id: Uuid) -> Option<LogEvent> {
    debug!(session_id = %session_id, len = data.len(), "authenticated command received");

    match demux(data) {
        Ok(Demuxed::Broadcast(payload)) => match decode(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    code = e.error_code(),
                    error = %e,
                    "dropping undecodable log event"
                );
                None
            }
        },
        Ok(Demuxed::Ignored { tag }) => {
            trace!(session_id = %session_id, tag, "ignoring frame");
            None
        }
        Err(e) => {
            warn!(
                session_id = %session_id,
                code = e.error_code(),
                error = %e,
                "dropping malformed frame"
            );
            None
        }
    }
}
