//! Feed Event Port (Driver Port)
//!
//! Every transport callback becomes a [`FeedEvent`] delivered over a channel
//! to a [`FeedEventHandler`], decoupling transport tasks from business logic.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::connection::ConnectionId;
use crate::domain::feed::FeedMessage;

/// Connection lifecycle or message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Handshake succeeded.
    Connected {
        /// Source connection.
        connection: ConnectionId,
    },
    /// Session closed or failed.
    Disconnected {
        /// Source connection.
        connection: ConnectionId,
        /// Close reason.
        reason: String,
    },
    /// A reconnect attempt has been scheduled.
    Reconnecting {
        /// Source connection.
        connection: ConnectionId,
        /// Attempt number since the last successful connect.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// A decoded inbound frame.
    Message {
        /// Source connection.
        connection: ConnectionId,
        /// Decoded frame.
        message: FeedMessage,
    },
    /// An inbound frame that could not be decoded.
    Malformed {
        /// Source connection.
        connection: ConnectionId,
        /// Decode error.
        error: String,
    },
}

/// Consumer of feed events.
#[async_trait]
pub trait FeedEventHandler: Send + Sync {
    /// Handle one event. Must not fail; errors are contained and logged.
    async fn handle(&self, event: FeedEvent);
}
