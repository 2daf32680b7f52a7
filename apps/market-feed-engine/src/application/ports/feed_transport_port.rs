//! Feed Transport Port (Driven Port)
//!
//! A streaming duplex session to the upstream feed. Adapters own framing,
//! wire encoding and keep-alive; the engine only sees decoded messages and
//! subscription commands.

use async_trait::async_trait;

use crate::domain::connection::{ConnectionId, Credential};
use crate::domain::feed::{FeedMessage, SubscriptionCommand};

/// Transport error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Handshake or connect failure.
    #[error("Feed connect failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// Outbound frame could not be sent.
    #[error("Feed send failed: {message}")]
    Send {
        /// Error details.
        message: String,
    },

    /// Outbound frame could not be encoded.
    #[error("Feed encode failed: {message}")]
    Encode {
        /// Error details.
        message: String,
    },
}

/// One inbound event from an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A decoded frame.
    Message(FeedMessage),
    /// A frame that could not be decoded.
    Malformed(String),
    /// The session ended (remote close, transport error, heartbeat timeout).
    Closed(String),
}

/// An open upstream session.
#[async_trait]
pub trait FeedSession: Send {
    /// Send one subscription control frame.
    async fn send(&mut self, command: &SubscriptionCommand) -> Result<(), TransportError>;

    /// Wait for the next inbound event. Must be cancel-safe.
    ///
    /// After `SessionEvent::Closed` the session is dead and is never reused.
    async fn next_event(&mut self) -> SessionEvent;

    /// Close the session. Errors are ignored.
    async fn close(&mut self);
}

/// Port for opening upstream sessions.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a new session authenticated with `credential`.
    async fn open(
        &self,
        connection: ConnectionId,
        credential: &Credential,
    ) -> Result<Box<dyn FeedSession>, TransportError>;
}
