//! Message value object and wire formats
//!
//! A `Message` always holds a non-empty, single-line payload: surrounding
//! whitespace is trimmed and embedded line breaks collapse to one space.
//! On the wire a message is either a compact JSON envelope
//! (`{"from":"...","text":"..."}`) or the bare text, one message per line.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::ClientId;

/// Line delimiter between coalesced messages in one frame
pub const DELIMITER: char = '\n';

/// Chat message carried from one peer to the rest of the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    from: ClientId,
    text: String,
}

/// Envelope as it arrives from the wire, before normalization
#[derive(Deserialize)]
struct Envelope {
    from: ClientId,
    text: String,
}

impl Message {
    /// Build a message from a raw payload
    ///
    /// Returns `None` when nothing remains after normalization.
    pub fn new(from: ClientId, raw: &str) -> Option<Self> {
        let text = normalize(raw);
        if text.is_empty() {
            None
        } else {
            Some(Self { from, text })
        }
    }

    pub fn from(&self) -> &ClientId {
        &self.from
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Encode as one wire line
    pub fn encode(&self, format: WireFormat) -> Result<String, AppError> {
        match format {
            WireFormat::Json => Ok(serde_json::to_string(self)?),
            WireFormat::Text => Ok(self.text.clone()),
        }
    }

    /// Decode one JSON envelope line, normalizing its text
    pub fn decode(line: &str) -> Result<Self, AppError> {
        let envelope: Envelope = serde_json::from_str(line)?;
        Self::new(envelope.from, &envelope.text).ok_or(AppError::EmptyMessage)
    }
}

/// Trim the payload and collapse every line break (with the whitespace
/// around it) into a single space.
pub fn normalize(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode every JSON envelope in a (possibly coalesced) frame
///
/// Blank lines are skipped; a malformed line fails the whole frame.
pub fn decode_frame(frame: &str) -> Result<Vec<Message>, AppError> {
    frame
        .split(DELIMITER)
        .filter(|line| !line.trim().is_empty())
        .map(Message::decode)
        .collect()
}

/// How outbound messages are rendered on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// One JSON envelope per line
    #[default]
    Json,
    /// Bare message text per line
    Text,
}

impl FromStr for WireFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "raw" => Ok(Self::Text),
            other => Err(AppError::Config(format!(
                "unknown wire format '{}', expected 'json' or 'text'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Text => f.write_str("text"),
        }
    }
}
