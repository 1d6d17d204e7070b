//! SessionLifecycleController: the receiver-facing façade.
//!
//! Holds the configuration, serializes `start()`/`shutdown()` behind one
//! async mutex, and owns at most one running supervisor. Decoded events from
//! whichever session is live flow through a single forwarder task to the
//! [`ReceiverHost`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::error::{ReceiverError, SessionError};
use crate::event::LogEvent;
use crate::gateway::GatewayConnector;
use crate::negotiator::ChannelNegotiator;
use crate::session::{GatewaySession, SessionSetup, SessionState};
use crate::supervisor::RestartSupervisor;

/// Buffered events between the live session and the host.
const EVENT_BUFFER: usize = 1024;

/// How long `shutdown()` waits for buffered events to reach the host.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The side that owns a receiver and consumes its events.
pub trait ReceiverHost: Send + Sync + 'static {
    /// Called once per decoded event, in arrival order.
    fn append(&self, event: LogEvent);

    /// The receiver gave up: its first session failed to build, or rebuilds
    /// were exhausted. The controller is already `Stopped`.
    fn start_failed(&self, _error: &SessionError) {}
}

struct Running<C: GatewayConnector> {
    supervisor: RestartSupervisor<GatewaySession<C>>,
    forwarder: JoinHandle<()>,
}

pub struct SessionLifecycleController<C: GatewayConnector, H: ReceiverHost> {
    connector: Arc<C>,
    host: Arc<H>,
    config: RwLock<ReceiverConfig>,
    lifecycle: Mutex<Option<Running<C>>>,
    state: Arc<watch::Sender<SessionState>>,
}

impl<C: GatewayConnector, H: ReceiverHost> SessionLifecycleController<C, H> {
    pub fn new(connector: C, host: H, config: ReceiverConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Stopped);
        Self {
            connector: Arc::new(connector),
            host: Arc::new(host),
            config: RwLock::new(config),
            lifecycle: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    // ── configuration ───────────────────────────────────────────────────
    //
    // None of these touch a running session; they are read on next start().

    pub async fn configure(&self, config: ReceiverConfig) {
        *self.config.write().await = config;
    }

    pub async fn set_guid(&self, guid: impl Into<String>) {
        self.config.write().await.credentials.guid = guid.into();
    }

    pub async fn set_password(&self, password: impl Into<String>) {
        self.config.write().await.credentials.password = password.into();
    }

    pub async fn set_host(&self, host: impl Into<String>) {
        self.config.write().await.credentials.host = host.into();
    }

    pub async fn config(&self) -> ReceiverConfig {
        self.config.read().await.clone()
    }

    // ── state ───────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Tear down any running session, then hand construction of a new one
    /// to a supervisor.
    ///
    /// Returns once the supervisor is running. Validation and client setup
    /// errors are returned here with the state left at `Stopped`; failures
    /// building the session itself reach [`ReceiverHost::start_failed`].
    pub async fn start(&self) -> Result<(), ReceiverError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.take() {
            info!("receiver already running, shutting down first");
            self.stop_running(running).await;
        }

        let config = self.config.read().await.clone();
        match self.launch(config) {
            Ok(running) => {
                *lifecycle = Some(running);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "receiver failed to start");
                self.state.send_replace(SessionState::Stopped);
                Err(e)
            }
        }
    }

    /// Stop supervising and destroy the current session. Safe to call when
    /// already stopped.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.take() {
            Some(running) => {
                self.stop_running(running).await;
                info!("receiver stopped");
            }
            None => {
                self.state.send_replace(SessionState::Stopped);
            }
        }
    }

    fn launch(&self, config: ReceiverConfig) -> Result<Running<C>, ReceiverError> {
        config.validate()?;
        let negotiator = ChannelNegotiator::new(config.broker.clone())?;

        info!(
            receiver = %config.name,
            channel = %config.credentials.guid,
            host = %config.credentials.host,
            "starting receiver"
        );
        self.state.send_replace(SessionState::Negotiating);

        let (events_tx, mut events_rx) = mpsc::channel::<LogEvent>(EVENT_BUFFER);
        let host = self.host.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                host.append(event);
            }
        });

        let setup = SessionSetup {
            receiver: config.name,
            credentials: config.credentials,
            negotiator,
            connector: self.connector.clone(),
            events: events_tx,
            state: self.state.clone(),
        };
        let host = self.host.clone();
        let supervisor = RestartSupervisor::spawn(
            move |failure| GatewaySession::new(setup.clone(), failure),
            config.restart,
            self.state.clone(),
            move |error| host.start_failed(&error),
        );

        Ok(Running {
            supervisor,
            forwarder,
        })
    }

    async fn stop_running(&self, mut running: Running<C>) {
        self.state.send_replace(SessionState::ShuttingDown);
        running.supervisor.stop().await;

        // Every event sender lived in the supervisor's sessions, so the
        // forwarder ends once it has drained what is buffered.
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut running.forwarder)
            .await
            .is_err()
        {
            debug!("event forwarder did not drain in time");
            running.forwarder.abort();
        }
        self.state.send_replace(SessionState::Stopped);
    }
}
