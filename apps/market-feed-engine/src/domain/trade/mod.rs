//! Trade Types
//!
//! A [`TradeTick`] is one inbound trade as delivered by the upstream feed.
//! A [`TradeRecord`] is the durable row written by the persister.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ticker symbol.
pub type Symbol = String;

/// One inbound trade event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Trade price.
    pub price: Decimal,
    /// Trade size.
    pub volume: Decimal,
    /// Upstream condition codes.
    pub conditions: Vec<String>,
    /// Upstream trade time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl TradeTick {
    /// Upstream trade time, if the millisecond value is representable.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Condition codes joined with commas.
    #[must_use]
    pub fn condition_string(&self) -> String {
        self.conditions.join(",")
    }
}

/// A persisted trade row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Trade price.
    pub price: Decimal,
    /// Trade size.
    pub volume: Decimal,
    /// Upstream trade time.
    pub trade_time: DateTime<Utc>,
    /// When the engine received the trade.
    pub received_at: DateTime<Utc>,
    /// Comma-separated condition codes.
    pub conditions: String,
}

impl TradeRecord {
    /// Build the record for a tick received at `received_at`.
    ///
    /// An unrepresentable upstream timestamp falls back to the receipt time.
    #[must_use]
    pub fn from_tick(tick: &TradeTick, received_at: DateTime<Utc>) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            price: tick.price,
            volume: tick.volume,
            trade_time: tick.timestamp().unwrap_or(received_at),
            received_at,
            conditions: tick.condition_string(),
        }
    }
}
