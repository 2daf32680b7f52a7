//! Feed Messages and Subscription Commands
//!
//! Codec-agnostic view of what the upstream feed sends and what the engine
//! sends back.

use std::time::Duration;

use super::trade::{Symbol, TradeTick};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// One or more trades.
    Trades(Vec<TradeTick>),
    /// Upstream keep-alive.
    Ping,
    /// Upstream protocol error.
    Error(UpstreamError),
    /// Frame with an unrecognised `type`.
    Unknown(String),
}

/// Classification of upstream error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// The connection is subscribed to more symbols than the plan allows.
    CapacityExceeded,
    /// Any other error.
    Other,
}

impl UpstreamErrorKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CapacityExceeded => "capacity_exceeded",
            Self::Other => "other",
        }
    }
}

/// An error frame sent by the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    /// Classified kind.
    pub kind: UpstreamErrorKind,
    /// Raw message text.
    pub message: String,
}

impl UpstreamError {
    /// Classify a raw error message.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("too many symbols") || lower.contains("symbol limit") {
            UpstreamErrorKind::CapacityExceeded
        } else {
            UpstreamErrorKind::Other
        };
        Self { kind, message }
    }
}

/// Subscription control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Start receiving trades for a symbol.
    Subscribe,
    /// Stop receiving trades for a symbol.
    Unsubscribe,
}

impl SubscriptionAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// One outbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCommand {
    /// Action to perform.
    pub action: SubscriptionAction,
    /// Target symbol.
    pub symbol: Symbol,
}

impl SubscriptionCommand {
    /// Subscribe to `symbol`.
    #[must_use]
    pub fn subscribe(symbol: impl Into<Symbol>) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            symbol: symbol.into(),
        }
    }

    /// Unsubscribe from `symbol`.
    #[must_use]
    pub fn unsubscribe(symbol: impl Into<Symbol>) -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            symbol: symbol.into(),
        }
    }
}

/// Pacing rule for bursts of control messages.
///
/// After every `batch_size` messages the sender sleeps for `pause`, keeping
/// the per-second message rate under the upstream limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribePacing {
    /// Messages per batch.
    pub batch_size: usize,
    /// Pause after each full batch.
    pub pause: Duration,
}

impl Default for SubscribePacing {
    fn default() -> Self {
        Self {
            batch_size: 10,
            pause: Duration::from_secs(1),
        }
    }
}

impl SubscribePacing {
    /// Whether a pause is due after `sent` messages have gone out.
    #[must_use]
    pub const fn pause_due(&self, sent: usize) -> bool {
        self.batch_size > 0 && sent > 0 && sent % self.batch_size == 0
    }
}
