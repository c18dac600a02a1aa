//! Event codec: one logical event to one text frame and back.
//!
//! Frame layout:
//!
//! ```text
//! event: <progress|complete|error>
//! data: <json>
//!
//! ```
//!
//! The trailing blank line is the only delimiter. `serde_json` never emits a
//! raw newline inside a string, so the payload cannot contain one.

use serde::Serialize;
use std::str::FromStr;

use crate::{EditResult, ErrorInfo, ProgressEvent, ProtoError};

/// Media type advertised by every producer of this protocol.
pub const CONTENT_TYPE: &str = "text/event-stream";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    Progress,
    Complete,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, EventKind::Progress)
    }
}

impl FromStr for EventKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress" => Ok(EventKind::Progress),
            "complete" => Ok(EventKind::Complete),
            "error" => Ok(EventKind::Error),
            other => Err(ProtoError::MalformedFrame(format!(
                "unrecognized event type '{}'",
                other
            ))),
        }
    }
}

/// One decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub enum WireEvent {
    Progress(ProgressEvent),
    Complete(EditResult),
    Error(ErrorInfo),
}

impl WireEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WireEvent::Progress(_) => EventKind::Progress,
            WireEvent::Complete(_) => EventKind::Complete,
            WireEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// Encode an arbitrary serializable payload under an event tag.
pub fn encode_frame<T: Serialize>(kind: EventKind, payload: &T) -> Result<String, ProtoError> {
    let json = serde_json::to_string(payload)?;
    Ok(format!("event: {}\ndata: {}\n\n", kind.as_str(), json))
}

pub fn encode(event: &WireEvent) -> Result<String, ProtoError> {
    match event {
        WireEvent::Progress(progress) => {
            progress.validate()?;
            encode_frame(EventKind::Progress, progress)
        }
        WireEvent::Complete(result) => encode_frame(EventKind::Complete, result),
        WireEvent::Error(error) => encode_frame(EventKind::Error, error),
    }
}

/// Decode one complete frame. The trailing delimiter may or may not be present.
///
/// Multiple `data:` lines are joined with `\n`. Lines starting with `:` are
/// comments. Other fields (`id:`, `retry:`, ...) are ignored.
pub fn decode(frame: &str) -> Result<WireEvent, ProtoError> {
    let mut event_type: Option<&str> = None;
    let mut data: Option<String> = None;

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event_type = Some(value),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if event_type.is_none() && data.is_none() {
        return Err(ProtoError::EmptyFrame);
    }

    let kind: EventKind = event_type
        .ok_or_else(|| ProtoError::MalformedFrame("missing event line".to_string()))?
        .parse()?;
    let data = data.ok_or_else(|| ProtoError::MalformedFrame("missing data line".to_string()))?;

    let malformed = |e: serde_json::Error| ProtoError::MalformedFrame(format!("invalid JSON payload: {}", e));

    let event = match kind {
        EventKind::Progress => WireEvent::Progress(serde_json::from_str(&data).map_err(malformed)?),
        EventKind::Complete => WireEvent::Complete(serde_json::from_str(&data).map_err(malformed)?),
        EventKind::Error => WireEvent::Error(serde_json::from_str(&data).map_err(malformed)?),
    };

    Ok(event)
}
