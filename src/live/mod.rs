pub mod connection;

use crate::error::ClientError;
use crate::model::{MessageUpdate, TextDraft};
use serde::Deserialize;
use std::fmt;

/// Monotonic activation counter. Events and results tagged with an older
/// generation belong to a superseded activation and are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Generation {
        Generation(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Typed inbound frame from the live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Append-or-replace by message id.
    Message(MessageUpdate),
    /// Room status; not part of the timeline.
    System {
        participants: u32,
        text: Option<String>,
    },
    /// Server rejected something we sent (e.g. an empty draft).
    Error(String),
}

/// Why a channel stopped delivering events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called on our side.
    Local,
    /// The server sent a close frame.
    Remote { code: u16, reason: String },
    /// The stream ended without a close frame.
    Dropped,
    ConnectFailed(String),
    Error(String),
}

/// Close code the server uses when the room does not exist.
pub const CLOSE_CONVERSATION_NOT_FOUND: u16 = 4004;

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed"),
            CloseReason::Remote { code, .. } if *code == CLOSE_CONVERSATION_NOT_FOUND => {
                f.write_str("conversation not found")
            }
            CloseReason::Remote { code, reason } if reason.is_empty() => {
                write!(f, "closed by server ({})", code)
            }
            CloseReason::Remote { code, reason } => {
                write!(f, "closed by server ({} {})", code, reason)
            }
            CloseReason::Dropped => f.write_str("connection dropped"),
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            CloseReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    Opened,
    Live(LiveEvent),
    Closed(CloseReason),
}

/// Everything a channel pushes into the caller's sink, stamped with the
/// generation it was opened under.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub generation: Generation,
    pub kind: ChannelEventKind,
}

/// Opens live channels. Implemented over WebSocket by
/// [`connection::ConnectionManager`].
pub trait Connector {
    type Handle: ChannelHandle;

    /// Start opening a channel for `conversation_id`. Never blocks; the
    /// handshake outcome arrives later as `Opened` or `Closed`.
    fn open(&self, conversation_id: &str, generation: Generation) -> Self::Handle;
}

pub trait ChannelHandle {
    fn generation(&self) -> Generation;
    fn is_open(&self) -> bool;
    /// Transmit a draft. Returns false, without failing, when the channel is
    /// connecting or closed.
    fn send(&self, draft: &TextDraft) -> bool;
    /// Idempotent.
    fn close(&self);
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InboundFrame {
    Message {
        message: MessageUpdate,
    },
    System {
        #[serde(default)]
        participants: u32,
        #[serde(default)]
        system_text: Option<String>,
    },
    Error {
        #[serde(default)]
        error: String,
    },
}

/// Decode one text frame. Unknown frame types and frames whose message has
/// no id are parse errors; callers drop and log them.
pub fn parse_frame(text: &str) -> Result<LiveEvent, ClientError> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    Ok(match frame {
        InboundFrame::Message { message } => {
            if message.id.is_none() {
                return Err(ClientError::Parse("message frame without id".into()));
            }
            LiveEvent::Message(message)
        }
        InboundFrame::System {
            participants,
            system_text,
        } => LiveEvent::System {
            participants,
            text: system_text,
        },
        InboundFrame::Error { error } => LiveEvent::Error(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_frame() {
        let event = parse_frame(
            r#"{"type":"message","message":{"id":"m1","translated_text":"Hola"}}"#,
        )
        .unwrap();
        match event {
            LiveEvent::Message(update) => {
                assert_eq!(update.id.as_ref().map(|i| i.as_str()), Some("m1"));
                assert_eq!(update.translated_text.as_deref(), Some("Hola"));
                assert!(update.original_text.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn parses_system_and_error_frames() {
        assert_eq!(
            parse_frame(r#"{"type":"system","system_text":"joined","participants":2}"#).unwrap(),
            LiveEvent::System {
                participants: 2,
                text: Some("joined".into())
            }
        );
        assert_eq!(
            parse_frame(r#"{"type":"error","error":"Empty message"}"#).unwrap(),
            LiveEvent::Error("Empty message".into())
        );
    }

    #[test]
    fn malformed_frames_are_parse_errors() {
        for raw in [
            "not json",
            r#"{"type":"presence"}"#,
            r#"{"type":"message","message":{"translated_text":"x"}}"#,
        ] {
            assert!(matches!(parse_frame(raw), Err(ClientError::Parse(_))), "{}", raw);
        }
    }

    #[test]
    fn close_reasons_render_for_users() {
        let not_found = CloseReason::Remote {
            code: CLOSE_CONVERSATION_NOT_FOUND,
            reason: "Conversation not found".into(),
        };
        assert_eq!(not_found.to_string(), "conversation not found");
        assert_eq!(Generation(1).next(), Generation(2));
    }
}
