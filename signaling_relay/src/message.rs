//! Signaling message classification
//!
//! The relay only looks at the `type` tag. Everything else in the payload is
//! opaque and is forwarded exactly as received.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use axum::extract::ws::{Message, Utf8Bytes};

use crate::error::ParseError;

/// A recognized WebRTC signaling message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Session description offer
    Offer { sdp: String },
    /// Session description answer
    Answer { sdp: String },
    /// ICE candidate, shape left to the peers
    Candidate { candidate: Value },
}

/// Classification of a parseable payload
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Signal(SignalingMessage),
    /// Valid JSON without a recognizable `type`; still relayed
    Unknown(Option<String>),
}

impl MessageKind {
    /// The `type` tag, for logging
    pub fn type_name(&self) -> Option<&str> {
        match self {
            MessageKind::Signal(SignalingMessage::Offer { .. }) => Some("offer"),
            MessageKind::Signal(SignalingMessage::Answer { .. }) => Some("answer"),
            MessageKind::Signal(SignalingMessage::Candidate { .. }) => Some("candidate"),
            MessageKind::Unknown(name) => name.as_deref(),
        }
    }
}

/// An inbound frame that parsed as JSON, with its original payload
#[derive(Debug, Clone)]
pub struct InboundMessage {
    payload: Utf8Bytes,
    kind: MessageKind,
}

impl InboundMessage {
    /// Classify a WebSocket frame
    ///
    /// Text frames and UTF-8 binary frames are accepted. Control frames and
    /// non-UTF-8 binary are [`ParseError::UnsupportedEncoding`].
    pub fn parse(frame: Message) -> Result<Self, ParseError> {
        let payload = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|_| ParseError::UnsupportedEncoding)?
                .into(),
            _ => return Err(ParseError::UnsupportedEncoding),
        };
        Self::parse_text(payload)
    }

    /// Classify a text payload
    pub fn parse_text(payload: Utf8Bytes) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(payload.as_str())?;
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let kind = match serde_json::from_value::<SignalingMessage>(value) {
            Ok(message) => MessageKind::Signal(message),
            Err(_) => MessageKind::Unknown(type_name),
        };

        Ok(Self { payload, kind })
    }

    /// The payload exactly as received
    pub fn payload(&self) -> &Utf8Bytes {
        &self.payload
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn type_name(&self) -> Option<&str> {
        self.kind.type_name()
    }
}
