//! Trade Store Port (Driven Port)
//!
//! Durable write/read contract for persisted trade records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::trade::TradeRecord;

/// Storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be opened or reached.
    #[error("Trade store unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// A write was rejected.
    #[error("Trade write failed: {message}")]
    Write {
        /// Error details.
        message: String,
    },

    /// A read failed.
    #[error("Trade query failed: {message}")]
    Query {
        /// Error details.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("Corrupt trade row: {message}")]
    Corrupt {
        /// Error details.
        message: String,
    },
}

/// Port for persisting and reading trade records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Write one record.
    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError>;

    /// Most recent `limit` records for `symbol`, newest first.
    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<TradeRecord>, StoreError>;

    /// Records for `symbol` with `from <= trade_time <= to`, oldest first.
    async fn range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, StoreError>;
}
