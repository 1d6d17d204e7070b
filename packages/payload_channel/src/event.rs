//! Log events decoded from broadcast frames.
//!
//! Payload: `{"name", "message", "level", "threadName", "time"}` where `time`
//! is epoch milliseconds. The instant is built straight from the epoch value;
//! it never passes through a zoned local-time string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// A structured log event received over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub logger_name: String,
    pub message: String,
    pub level: String,
    pub thread_name: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    name: String,
    message: String,
    level: String,
    thread_name: String,
    time: i64,
}

/// Decode a broadcast payload. Pure; performs no I/O.
pub fn decode(payload: &[u8]) -> Result<LogEvent, DecodeError> {
    let wire: WireEvent = serde_json::from_slice(payload)?;
    let timestamp = DateTime::from_timestamp_millis(wire.time)
        .ok_or(DecodeError::TimestampOutOfRange { millis: wire.time })?;

    Ok(LogEvent {
        logger_name: wire.name,
        message: wire.message,
        level: wire.level,
        thread_name: wire.thread_name,
        timestamp,
    })
}
