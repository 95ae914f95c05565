//! Stream Codec Module
//!
//! JSON encoding of outgoing commands and decoding of inbound envelopes.
//!
//! Decoding is two-stage: the frame is parsed into a loose wire shape, then
//! the `type` tag selects how `msg` is interpreted. Unknown tags are treated
//! as data so new server-side channels flow through without a code change.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::subscription::{CommandId, Sid};
use crate::infrastructure::kalshi::messages::{
    Command, Envelope, EnvelopeBody, ErrorMessage, SubscribedMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required by the envelope type was absent.
    #[error("`{kind}` envelope missing field `{field}`")]
    MissingField {
        /// Envelope type tag.
        kind: String,
        /// Missing field name.
        field: &'static str,
    },

    /// Binary frame was not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Loose wire shape of every inbound frame.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<CommandId>,
    #[serde(default)]
    sid: Option<Sid>,
    #[serde(default)]
    seq: Option<i64>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    msg: Option<Value>,
}

/// JSON codec for the Kalshi stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a command to its JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &Command) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }

    /// Decode a text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, has no `type`, or lacks a
    /// field its type requires.
    pub fn decode(&self, text: &str) -> Result<Envelope, CodecError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let body = match raw.kind.as_str() {
            "subscribed" => {
                let msg = Self::require_msg(&raw.kind, raw.msg)?;
                EnvelopeBody::Subscribed(serde_json::from_value::<SubscribedMessage>(msg)?)
            }
            "unsubscribed" => {
                if raw.sid.is_none() {
                    return Err(CodecError::MissingField {
                        kind: raw.kind,
                        field: "sid",
                    });
                }
                EnvelopeBody::Unsubscribed
            }
            "ok" => EnvelopeBody::Ok(raw.msg),
            "error" => {
                let msg = Self::require_msg(&raw.kind, raw.msg)?;
                EnvelopeBody::Error(serde_json::from_value::<ErrorMessage>(msg)?)
            }
            _ => EnvelopeBody::Data {
                msg: raw.msg.unwrap_or(Value::Null),
                kind: raw.kind,
            },
        };

        Ok(Envelope {
            id: raw.id,
            sid: raw.sid,
            seq: raw.seq,
            body,
        })
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not UTF-8 or fail [`Self::decode`].
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        self.decode(text)
    }

    fn require_msg(kind: &str, msg: Option<Value>) -> Result<Value, CodecError> {
        msg.ok_or_else(|| CodecError::MissingField {
            kind: kind.to_string(),
            field: "msg",
        })
    }
}
