//! Terminal receiver host: prints events to stdout.

use std::io::Write;
use std::sync::Mutex;

use chrono::SecondsFormat;
use payload_channel::{LogEvent, ReceiverHost, SessionError};
use tokio::sync::oneshot;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `timestamp level [thread] logger - message`
    Text,
    /// One JSON object per line.
    Json,
}

pub fn format_event(event: &LogEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!(
            "{} {:<5} [{}] {} - {}",
            event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            event.level,
            event.thread_name,
            event.logger_name,
            event.message
        ),
        OutputFormat::Json => serde_json::to_string(event).unwrap_or_else(|e| {
            warn!(error = %e, "failed to serialize event");
            String::new()
        }),
    }
}

pub struct StdoutHost {
    format: OutputFormat,
    failed: Mutex<Option<oneshot::Sender<String>>>,
}

impl StdoutHost {
    /// The receiver resolves once if the channel gives up.
    pub fn new(format: OutputFormat) -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        let host = Self {
            format,
            failed: Mutex::new(Some(tx)),
        };
        (host, rx)
    }
}

impl ReceiverHost for StdoutHost {
    fn append(&self, event: LogEvent) {
        let line = format_event(&event, self.format);
        if line.is_empty() {
            return;
        }
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }

    fn start_failed(&self, err: &SessionError) {
        error!(error = %err, code = err.error_code(), "receiver gave up");
        if let Ok(mut slot) = self.failed.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(err.to_string());
            }
        }
    }
}
