//! RestartSupervisor: keeps exactly one live session, rebuilding it whenever
//! it reports failure.
//!
//! The supervisor task owns the build → run → destroy-and-rebuild loop. The
//! current session lives behind a mutex that is held for the whole
//! destroy-then-build step, so `stop()` can never observe two live sessions
//! or a half-swapped slot. `stop()` cancels first, which interrupts an
//! in-flight build before it takes the lock.
//!
//! Each session gets its own [`FailureSignal`]. The supervisor only listens
//! to the signal of the session it just built; signals from destroyed
//! sessions (or any signal after `stop()`) reach a dropped receiver and are
//! ignored.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RestartPolicy;
use crate::error::SessionError;
use crate::session::{SessionState, report_state};

/// A session the supervisor can build and tear down.
pub trait SupervisedSession: Send + 'static {
    fn start(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Release everything the session holds. Safe to call more than once.
    fn destroy(&mut self) -> impl Future<Output = ()> + Send;
}

/// One-shot failure notification from a session to its supervisor.
#[derive(Debug, Default)]
pub struct FailureSignal {
    tx: Option<oneshot::Sender<()>>,
}

impl FailureSignal {
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Signal failure. Returns `true` only the first time.
    pub fn fire(&mut self) -> bool {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.tx.is_none()
    }
}

/// Handle to a running supervision loop.
pub struct RestartSupervisor<S> {
    cancel: CancellationToken,
    current: Arc<Mutex<Option<S>>>,
    task: Option<JoinHandle<()>>,
}

impl<S: SupervisedSession> RestartSupervisor<S> {
    /// Start supervising on a background task.
    ///
    /// If the very first build fails, or rebuilds exhaust `policy`, the loop
    /// sets `Stopped` and hands the last error to `on_give_up`.
    pub fn spawn<F, G>(
        factory: F,
        policy: RestartPolicy,
        state: Arc<watch::Sender<SessionState>>,
        on_give_up: G,
    ) -> Self
    where
        F: FnMut(FailureSignal) -> S + Send + 'static,
        G: FnOnce(SessionError) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let current = Arc::new(Mutex::new(None));
        let task = tokio::spawn(supervise(
            factory,
            policy,
            current.clone(),
            cancel.clone(),
            state,
            on_give_up,
        ));
        Self {
            cancel,
            current,
            task: Some(task),
        }
    }

    /// Stop rebuilding and destroy the current session. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("supervisor task panicked");
                }
            }
        }

        let mut current = self.current.lock().await;
        if let Some(mut session) = current.take() {
            session.destroy().await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<S> Drop for RestartSupervisor<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise<S, F, G>(
    mut factory: F,
    policy: RestartPolicy,
    current: Arc<Mutex<Option<S>>>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    on_give_up: G,
) where
    S: SupervisedSession,
    F: FnMut(FailureSignal) -> S + Send + 'static,
    G: FnOnce(SessionError) + Send + 'static,
{
    let mut attempt: u32 = 0;
    let mut established = false;

    loop {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before rebuild");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let (signal, failed) = FailureSignal::pair();
        let built = {
            let mut slot = current.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            if let Some(mut stale) = slot.take() {
                stale.destroy().await;
            }

            let mut session = factory(signal);
            let started = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = session.start() => Some(result),
            };
            match started {
                None => {
                    session.destroy().await;
                    return;
                }
                Some(Ok(())) => {
                    *slot = Some(session);
                    Ok(())
                }
                Some(Err(error)) => {
                    session.destroy().await;
                    Err(error)
                }
            }
        };

        match built {
            Ok(()) => {
                attempt = 0;
                established = true;
                report_state(&state, SessionState::Active);
                info!("session active");
            }
            Err(error) => {
                attempt += 1;
                if !established || policy.exhausted(attempt) {
                    warn!(
                        error = %error,
                        code = error.error_code(),
                        attempt,
                        "session build failed, giving up"
                    );
                    report_state(&state, SessionState::Stopped);
                    on_give_up(error);
                    return;
                }
                warn!(
                    error = %error,
                    code = error.error_code(),
                    attempt,
                    "session rebuild failed, will retry"
                );
                report_state(&state, SessionState::Disconnected);
                continue;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = failed => {}
        }

        info!("session disconnected, rebuilding");
        report_state(&state, SessionState::Disconnected);
        {
            let mut slot = current.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            if let Some(mut dead) = slot.take() {
                dead.destroy().await;
            }
        }
        attempt = 1;
    }
}
