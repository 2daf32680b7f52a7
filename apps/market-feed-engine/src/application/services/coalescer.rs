//! Trade Coalescer & Persister
//!
//! Keeps the latest tick per symbol for low-latency readers and downsamples
//! the tick stream into at most one durable write per symbol per interval.
//!
//! # Processing
//!
//! 1. The latest-trade entry for the symbol is overwritten unconditionally.
//! 2. If persistence is disabled, nothing is written.
//! 3. Otherwise the tick is written when the symbol has no save checkpoint or
//!    the checkpoint is at least one interval old. The checkpoint advances only
//!    when the write succeeds, so a failed write is retried on the next tick.
//!
//! Both maps are sharded concurrent maps; connection tasks update them
//! without any external lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::application::ports::TradeStore;
use crate::domain::trade::{Symbol, TradeRecord, TradeTick};
use crate::infrastructure::metrics;

/// What happened to a tick on the persistence path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    /// Written to storage; checkpoint advanced.
    Persisted,
    /// Persistence is disabled process-wide.
    SavingDisabled,
    /// The symbol was written less than one interval ago.
    Throttled,
    /// The write failed; checkpoint left unchanged.
    Failed,
}

/// Coalescer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Ticks received.
    pub trades_received: u64,
    /// Records written.
    pub trades_persisted: u64,
    /// Ticks skipped by the save interval.
    pub trades_throttled: u64,
    /// Failed writes.
    pub persist_failures: u64,
    /// Symbols with a latest-trade entry.
    pub tracked_symbols: usize,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    persisted: AtomicU64,
    throttled: AtomicU64,
    failed: AtomicU64,
}

/// Latest-value map plus throttled persistence.
pub struct TradeCoalescer {
    store: Arc<dyn TradeStore>,
    interval: TimeDelta,
    saving_enabled: AtomicBool,
    latest: DashMap<Symbol, TradeTick>,
    checkpoints: DashMap<Symbol, DateTime<Utc>>,
    counters: Counters,
}

impl std::fmt::Debug for TradeCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeCoalescer")
            .field("interval", &self.interval)
            .field("saving_enabled", &self.is_saving_enabled())
            .field("tracked_symbols", &self.latest.len())
            .finish_non_exhaustive()
    }
}

impl TradeCoalescer {
    /// Create a coalescer writing to `store` at most once per `interval` per
    /// symbol. Persistence starts disabled.
    #[must_use]
    pub fn new(store: Arc<dyn TradeStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
            saving_enabled: AtomicBool::new(false),
            latest: DashMap::new(),
            checkpoints: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Handle a tick received now.
    pub async fn on_trade(&self, tick: TradeTick) -> TradeOutcome {
        self.on_trade_at(tick, Utc::now()).await
    }

    /// Handle a tick received at `now`.
    pub async fn on_trade_at(&self, tick: TradeTick, now: DateTime<Utc>) -> TradeOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let symbol = tick.symbol.clone();
        let record = TradeRecord::from_tick(&tick, now);
        self.latest.insert(symbol.clone(), tick);

        if !self.is_saving_enabled() {
            return TradeOutcome::SavingDisabled;
        }

        if !self.is_due(&symbol, now) {
            self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            metrics::record_trade_throttled();
            return TradeOutcome::Throttled;
        }

        let started = Instant::now();
        match self.store.insert(&record).await {
            Ok(()) => {
                self.checkpoints.insert(symbol, now);
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                metrics::record_trade_persisted(started.elapsed());
                TradeOutcome::Persisted
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_persist_failure();
                tracing::warn!(symbol = %symbol, error = %e, "Failed to persist trade");
                TradeOutcome::Failed
            }
        }
    }

    fn is_due(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.checkpoints
            .get(symbol)
            .is_none_or(|last| now.signed_duration_since(*last) >= self.interval)
    }

    /// Enable or disable persistence.
    pub fn set_saving_enabled(&self, enabled: bool) {
        let previous = self.saving_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::info!(enabled, "Trade persistence toggled");
        }
        metrics::set_data_saving_enabled(enabled);
    }

    /// Whether persistence is enabled.
    #[must_use]
    pub fn is_saving_enabled(&self) -> bool {
        self.saving_enabled.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of the latest tick per symbol.
    #[must_use]
    pub fn latest_snapshot(&self) -> HashMap<Symbol, TradeTick> {
        self.latest
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Latest tick for one symbol.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<TradeTick> {
        self.latest.get(symbol).map(|entry| entry.value().clone())
    }

    /// Last successful write time for `symbol`.
    #[must_use]
    pub fn checkpoint(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.checkpoints.get(symbol).map(|entry| *entry.value())
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            trades_received: self.counters.received.load(Ordering::Relaxed),
            trades_persisted: self.counters.persisted.load(Ordering::Relaxed),
            trades_throttled: self.counters.throttled.load(Ordering::Relaxed),
            persist_failures: self.counters.failed.load(Ordering::Relaxed),
            tracked_symbols: self.latest.len(),
        }
    }
}
