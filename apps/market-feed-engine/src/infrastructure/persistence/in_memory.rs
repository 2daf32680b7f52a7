//! In-memory trade store for tests and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{StoreError, TradeStore};
use crate::domain::trade::TradeRecord;

/// In-memory implementation of [`TradeStore`].
///
/// Suitable for testing and development. Not for production use.
#[derive(Debug, Default)]
pub struct InMemoryTradeStore {
    records: RwLock<Vec<TradeRecord>>,
}

impl InMemoryTradeStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Every record in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<TradeRecord> {
        self.records.read().clone()
    }

    /// Remove all records.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let mut matching: Vec<_> = self
            .records
            .read()
            .iter()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.trade_time.cmp(&a.trade_time));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let mut matching: Vec<_> = self
            .records
            .read()
            .iter()
            .filter(|r| r.symbol == symbol && r.trade_time >= from && r.trade_time <= to)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.trade_time);
        Ok(matching)
    }
}
