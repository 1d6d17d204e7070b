//! Tagged frames carried inside authenticated gateway commands.
//!
//! Wire format: `[2-byte big-endian tag][payload]`
//!
//! The tag is read most-significant byte first, so the broadcast tag `'B'`
//! arrives as `[0x00, 0x42]`. Every multi-byte integer in this crate's wire
//! formats is big-endian.

use crate::error::FrameError;

/// Frame tag for broadcast log events.
pub const BROADCAST: u16 = b'B' as u16;

/// One inbound message split into its tag and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub tag: u16,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, FrameError> {
        match raw {
            [hi, lo, payload @ ..] => Ok(Self {
                tag: u16::from_be_bytes([*hi, *lo]),
                payload,
            }),
            _ => Err(FrameError::Malformed { len: raw.len() }),
        }
    }
}

/// What a frame means to this receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demuxed<'a> {
    /// A broadcast frame; the payload is a JSON log event.
    Broadcast(&'a [u8]),
    /// A frame kind this receiver does not consume. Not an error: newer
    /// senders may add frame kinds.
    Ignored { tag: u16 },
}

/// Classify an inbound message by its tag.
pub fn demux(raw: &[u8]) -> Result<Demuxed<'_>, FrameError> {
    let frame = Frame::parse(raw)?;
    Ok(match frame.tag {
        BROADCAST => Demuxed::Broadcast(frame.payload),
        tag => Demuxed::Ignored { tag },
    })
}

/// Build a frame from a tag and payload.
pub fn encode(tag: u16, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(payload.len() + 2);
    raw.extend_from_slice(&tag.to_be_bytes());
    raw.extend_from_slice(payload);
    raw
}
