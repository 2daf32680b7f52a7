//! Feed Codec
//!
//! Decodes inbound text frames into [`FeedMessage`]s and encodes
//! [`SubscriptionCommand`]s. Frames are dispatched on their `type` field;
//! unrecognised types decode to [`FeedMessage::Unknown`] rather than failing.

use super::messages::{ControlFrame, ErrorFrame, TradeEntry};
use crate::domain::feed::{FeedMessage, SubscriptionCommand, UpstreamError};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame has no string `type` field.
    #[error("frame has no type field")]
    MissingType,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the trade feed.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, has no `type`, or a
    /// known frame type has an invalid body.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let mut value: serde_json::Value = serde_json::from_str(trimmed)?;
        let frame_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(CodecError::MissingType)?
            .to_string();

        match frame_type.as_str() {
            "trade" => {
                let data = value
                    .get_mut("data")
                    .map(serde_json::Value::take)
                    .unwrap_or_default();
                let entries: Vec<TradeEntry> = if data.is_null() {
                    Vec::new()
                } else {
                    serde_json::from_value(data)?
                };
                Ok(FeedMessage::Trades(entries.into_iter().map(Into::into).collect()))
            }
            "ping" => Ok(FeedMessage::Ping),
            "error" => {
                let frame: ErrorFrame = serde_json::from_value(value)?;
                Ok(FeedMessage::Error(UpstreamError::classify(frame.msg)))
            }
            _ => Ok(FeedMessage::Unknown(frame_type)),
        }
    }

    /// Encode a subscription command.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, command: &SubscriptionCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&ControlFrame::from(command))?)
    }
}
