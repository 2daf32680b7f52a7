//! Message Router
//!
//! Consumes [`FeedEvent`]s from the connection tasks. Trades go to the
//! coalescer; pings, unknown and malformed frames are dropped; upstream error
//! frames are logged, with capacity errors called out separately.

use std::sync::Arc;

use async_trait::async_trait;

use super::coalescer::TradeCoalescer;
use crate::application::ports::{FeedEvent, FeedEventHandler};
use crate::domain::connection::ConnectionId;
use crate::domain::feed::{FeedMessage, UpstreamError, UpstreamErrorKind};
use crate::infrastructure::metrics::{self, FrameKind};

/// Routes decoded feed events to the coalescer.
#[derive(Debug)]
pub struct MessageRouter {
    coalescer: Arc<TradeCoalescer>,
}

impl MessageRouter {
    /// Create a router feeding `coalescer`.
    #[must_use]
    pub const fn new(coalescer: Arc<TradeCoalescer>) -> Self {
        Self { coalescer }
    }

    async fn route(&self, connection: ConnectionId, message: FeedMessage) {
        match message {
            FeedMessage::Trades(ticks) => {
                metrics::record_frame(FrameKind::Trade);
                metrics::record_trades_received(ticks.len() as u64);
                for tick in ticks {
                    self.coalescer.on_trade(tick).await;
                }
            }
            FeedMessage::Ping => {
                metrics::record_frame(FrameKind::Ping);
                tracing::trace!(connection = %connection, "Upstream ping");
            }
            FeedMessage::Error(error) => {
                metrics::record_frame(FrameKind::Error);
                metrics::record_upstream_error(error.kind);
                log_upstream_error(connection, &error);
            }
            FeedMessage::Unknown(kind) => {
                metrics::record_frame(FrameKind::Unknown);
                tracing::debug!(connection = %connection, kind = %kind, "Ignoring unknown frame type");
            }
        }
    }
}

fn log_upstream_error(connection: ConnectionId, error: &UpstreamError) {
    match error.kind {
        UpstreamErrorKind::CapacityExceeded => tracing::error!(
            connection = %connection,
            message = %error.message,
            "Upstream symbol capacity exceeded; lower the per-connection shard capacity"
        ),
        UpstreamErrorKind::Other => tracing::warn!(
            connection = %connection,
            message = %error.message,
            "Upstream error frame"
        ),
    }
}

#[async_trait]
impl FeedEventHandler for MessageRouter {
    async fn handle(&self, event: FeedEvent) {
        match event {
            FeedEvent::Message {
                connection,
                message,
            } => self.route(connection, message).await,
            FeedEvent::Malformed { connection, error } => {
                metrics::record_frame(FrameKind::Malformed);
                tracing::warn!(connection = %connection, error = %error, "Dropping malformed frame");
            }
            FeedEvent::Connected { connection } => {
                tracing::debug!(connection = %connection, "Connection event: connected");
            }
            FeedEvent::Disconnected { connection, reason } => {
                tracing::debug!(connection = %connection, reason = %reason, "Connection event: disconnected");
            }
            FeedEvent::Reconnecting {
                connection,
                attempt,
                delay,
            } => {
                tracing::debug!(
                    connection = %connection,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Connection event: reconnecting"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::TradeTick;
    use crate::infrastructure::persistence::InMemoryTradeStore;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn router() -> (MessageRouter, Arc<TradeCoalescer>) {
        let coalescer = Arc::new(TradeCoalescer::new(
            Arc::new(InMemoryTradeStore::new()),
            Duration::from_secs(10),
        ));
        (MessageRouter::new(coalescer.clone()), coalescer)
    }

    fn tick(symbol: &str, price: i64) -> TradeTick {
        TradeTick {
            symbol: symbol.to_string(),
            price: Decimal::from(price),
            volume: Decimal::ONE,
            conditions: vec![],
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn trades_reach_the_coalescer() {
        let (router, coalescer) = router();
        router
            .handle(FeedEvent::Message {
                connection: ConnectionId::new(1),
                message: FeedMessage::Trades(vec![tick("AAPL", 1), tick("MSFT", 2), tick("AAPL", 3)]),
            })
            .await;

        let snapshot = coalescer.latest_snapshot();
        assert_eq!(snapshot["AAPL"].price, Decimal::from(3));
        assert_eq!(snapshot["MSFT"].price, Decimal::from(2));
        assert_eq!(coalescer.stats().trades_received, 3);
    }

    #[tokio::test]
    async fn control_and_malformed_frames_never_reach_the_coalescer() {
        let (router, coalescer) = router();
        let connection = ConnectionId::new(2);

        for message in [
            FeedMessage::Ping,
            FeedMessage::Error(UpstreamError::classify("Subscribing to too many symbols")),
            FeedMessage::Error(UpstreamError::classify("Invalid token")),
            FeedMessage::Unknown("news".to_string()),
        ] {
            router.handle(FeedEvent::Message { connection, message }).await;
        }
        router
            .handle(FeedEvent::Malformed {
                connection,
                error: "expected value".to_string(),
            })
            .await;
        router.handle(FeedEvent::Connected { connection }).await;

        assert_eq!(coalescer.stats().trades_received, 0);
        assert!(coalescer.latest_snapshot().is_empty());
    }
}
