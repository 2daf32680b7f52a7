//! Feed Engine
//!
//! Facade the rest of the application talks to. It owns the connection
//! manager, subscription driver and coalescer, and implements the
//! [`SessionLifecycle`] the scheduler and health monitor drive.
//!
//! A session start is `connect_all` → settle delay → subscribe; a session end
//! is unsubscribe → `disconnect_all`. Both are serialized so overlapping
//! triggers from the scheduler, the health monitor and administrators
//! converge on one sequence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::coalescer::{EngineStats, TradeCoalescer};
use super::connection_manager::ConnectionManager;
use super::subscriptions::{SubscriptionDriver, SubscriptionReport};
use crate::application::error::EngineError;
use crate::application::ports::{SessionLifecycle, SymbolUniverse};
use crate::domain::connection::ConnectionId;
use crate::domain::trade::{Symbol, TradeTick};

/// Market-data ingestion engine.
pub struct FeedEngine {
    connections: Arc<ConnectionManager>,
    driver: SubscriptionDriver,
    coalescer: Arc<TradeCoalescer>,
    universe: Arc<dyn SymbolUniverse>,
    settle_delay: Duration,
    cycle: Mutex<()>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for FeedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedEngine")
            .field("connections", &self.connections)
            .field("capacity", &self.driver.capacity())
            .field("settle_delay", &self.settle_delay)
            .finish_non_exhaustive()
    }
}

impl FeedEngine {
    /// Assemble an engine.
    #[must_use]
    pub fn new(
        connections: Arc<ConnectionManager>,
        driver: SubscriptionDriver,
        coalescer: Arc<TradeCoalescer>,
        universe: Arc<dyn SymbolUniverse>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            connections,
            driver,
            coalescer,
            universe,
            settle_delay,
            cycle: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }

    fn ensure_credentials(&self) -> Result<(), EngineError> {
        if self.connections.valid_credential_count() == 0 {
            tracing::error!("No valid feed credentials configured; engine is idle");
            return Err(EngineError::NoCredentials);
        }
        Ok(())
    }

    /// Open one connection per valid credential that has none. Returns how
    /// many were started.
    ///
    /// # Errors
    ///
    /// `NoCredentials` when the pool is empty, `ShutDown` after shutdown.
    pub async fn connect_all(&self) -> Result<usize, EngineError> {
        self.ensure_running()?;
        self.ensure_credentials()?;
        Ok(self.connections.connect_all().await)
    }

    /// Close every connection and reset status.
    pub async fn disconnect_all(&self) {
        self.connections.disconnect_all().await;
    }

    /// Per-connection liveness.
    #[must_use]
    pub fn connection_status(&self) -> BTreeMap<ConnectionId, bool> {
        self.connections.connection_status()
    }

    /// Whether at least one connection is live.
    #[must_use]
    pub fn is_any_connected(&self) -> bool {
        self.connections.is_any_connected()
    }

    /// Snapshot of the latest tick per symbol.
    #[must_use]
    pub fn latest_trade_by_symbol(&self) -> HashMap<Symbol, TradeTick> {
        self.coalescer.latest_snapshot()
    }

    /// Override the persistence flag.
    pub fn set_data_saving_enabled(&self, enabled: bool) {
        self.coalescer.set_saving_enabled(enabled);
    }

    /// Current persistence flag.
    #[must_use]
    pub fn is_data_saving_enabled(&self) -> bool {
        self.coalescer.is_saving_enabled()
    }

    /// Coalescer counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.coalescer.stats()
    }

    /// The connection manager.
    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Connect, wait for handshakes to settle, then partition the current
    /// universe across live connections and subscribe.
    ///
    /// # Errors
    ///
    /// `NoCredentials`, `ShutDown`, or a universe load failure.
    pub async fn connect_and_subscribe(&self) -> Result<SubscriptionReport, EngineError> {
        self.ensure_running()?;
        let _cycle = self.cycle.lock().await;
        self.ensure_credentials()?;

        let started = self.connections.connect_all().await;
        if started > 0 {
            tokio::time::sleep(self.settle_delay).await;
        }

        let universe = self.universe.symbols().await?;
        tracing::info!(
            symbols = universe.len(),
            live = self.connections.live_count(),
            "Subscribing symbol universe"
        );
        Ok(self.driver.subscribe(&universe).await)
    }

    /// Release subscriptions and disconnect.
    pub async fn unsubscribe_and_disconnect(&self) {
        let _cycle = self.cycle.lock().await;
        self.driver.unsubscribe_all().await;
        self.connections.disconnect_all().await;
    }

    /// Stop everything. Subsequent administrative calls fail with `ShutDown`.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.coalescer.set_saving_enabled(false);
        self.connections.shutdown().await;
    }
}

#[async_trait]
impl SessionLifecycle for FeedEngine {
    async fn start_session(&self) -> Result<(), EngineError> {
        self.connect_and_subscribe().await.map(|_| ())
    }

    async fn end_session(&self) {
        self.unsubscribe_and_disconnect().await;
    }

    fn set_data_saving_enabled(&self, enabled: bool) {
        Self::set_data_saving_enabled(self, enabled);
    }

    fn is_data_saving_enabled(&self) -> bool {
        Self::is_data_saving_enabled(self)
    }

    fn is_any_connected(&self) -> bool {
        Self::is_any_connected(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::connection_manager::ManagerConfig;
    use crate::application::services::reconnect::ReconnectConfig;
    use crate::application::services::router::MessageRouter;
    use crate::application::services::test_support::{FakeTransport, advance, pool};
    use crate::domain::feed::{SubscribePacing, SubscriptionCommand};
    use crate::infrastructure::persistence::InMemoryTradeStore;
    use crate::infrastructure::universe::StaticSymbolUniverse;

    const CAPACITY: usize = 50;

    fn symbols(n: usize) -> Vec<Symbol> {
        (0..n).map(|i| format!("S{i:04}")).collect()
    }

    fn engine(tokens: &[&str], universe: Vec<Symbol>, transport: &Arc<FakeTransport>) -> FeedEngine {
        engine_with_capacity(tokens, universe, transport, CAPACITY)
    }

    fn engine_with_capacity(
        tokens: &[&str],
        universe: Vec<Symbol>,
        transport: &Arc<FakeTransport>,
        capacity: usize,
    ) -> FeedEngine {
        let coalescer = Arc::new(TradeCoalescer::new(
            Arc::new(InMemoryTradeStore::new()),
            Duration::from_secs(10),
        ));
        let connections = Arc::new(ConnectionManager::new(
            pool(tokens),
            transport.clone(),
            Arc::new(MessageRouter::new(coalescer.clone())),
            ManagerConfig {
                connect_stagger: Duration::from_secs(2),
                reconnect: ReconnectConfig::fixed(Duration::from_secs(5)),
                pacing: SubscribePacing::default(),
                event_buffer: 64,
            },
        ));
        let driver = SubscriptionDriver::new(connections.clone(), capacity, SubscribePacing::default());
        FeedEngine::new(
            connections,
            driver,
            coalescer,
            Arc::new(StaticSymbolUniverse::new(universe)),
            Duration::from_secs(3),
        )
    }

    fn subscribed(transport: &FakeTransport, id: ConnectionId) -> Vec<Symbol> {
        transport
            .sent(id)
            .into_iter()
            .filter(|c| c == &SubscriptionCommand::subscribe(c.symbol.clone()))
            .map(|c| c.symbol)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_universe_is_sharded_and_reported() {
        let transport = Arc::new(FakeTransport::default());
        let universe = symbols(120);
        let engine = engine(&["a", "b"], universe.clone(), &transport);

        let report = engine.connect_and_subscribe().await.unwrap();
        advance().await;

        assert_eq!(report.subscribed, 100);
        assert_eq!(report.plan.unassigned, universe[100..120].to_vec());
        assert_eq!(subscribed(&transport, ConnectionId::new(1)), universe[0..50].to_vec());
        assert_eq!(subscribed(&transport, ConnectionId::new(2)), universe[50..100].to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_mode_covers_first_shard() {
        let transport = Arc::new(FakeTransport::default());
        let universe = symbols(120);
        let engine = engine(&["", "b", " "], universe.clone(), &transport);

        let report = engine.connect_and_subscribe().await.unwrap();
        advance().await;

        assert!(engine.is_any_connected());
        assert_eq!(engine.connections().live_count(), 1);
        assert_eq!(report.plan.shards.len(), 1);
        assert_eq!(report.plan.shards[0].symbols, universe[0..CAPACITY].to_vec());
        assert_eq!(subscribed(&transport, ConnectionId::new(2)), universe[0..CAPACITY].to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_cycle_sends_nothing_new() {
        let transport = Arc::new(FakeTransport::default());
        let engine = engine(&["a"], symbols(30), &transport);

        engine.connect_and_subscribe().await.unwrap();
        let second = engine.connect_and_subscribe().await.unwrap();
        advance().await;

        assert_eq!(second.subscribed, 0);
        assert_eq!(second.unsubscribed, 0);
        assert_eq!(transport.sent(ConnectionId::new(1)).len(), 30);
        assert_eq!(transport.open_count(ConnectionId::new(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resharding_during_outage_keeps_shards_disjoint() {
        let transport = Arc::new(FakeTransport::default());
        let universe = symbols(4);
        let engine = engine_with_capacity(&["a", "b"], universe.clone(), &transport, 2);
        let (first, second) = (ConnectionId::new(1), ConnectionId::new(2));

        engine.connect_and_subscribe().await.unwrap();
        advance().await;
        assert_eq!(engine.connections().assigned_shard(first), universe[0..2].to_vec());
        assert_eq!(engine.connections().assigned_shard(second), universe[2..4].to_vec());

        transport.close_session(first, "dropped");
        advance().await;
        assert_eq!(engine.connections().live_count(), 1);

        // Only the second connection is live; it takes over the head shard.
        let report = engine.connect_and_subscribe().await.unwrap();
        assert_eq!(report.plan.shards.len(), 1);
        assert!(engine.connections().assigned_shard(first).is_empty());
        assert_eq!(engine.connections().assigned_shard(second), universe[0..2].to_vec());

        // The first connection comes back without reclaiming its old shard.
        tokio::time::sleep(Duration::from_secs(6)).await;
        advance().await;
        assert_eq!(transport.open_count(first), 2);
        assert_eq!(engine.connections().live_count(), 2);
        assert!(engine.connections().assigned_shard(first).is_empty());
        assert_eq!(transport.sent(first).len(), 2);

        // The next cycle spreads the universe over both again.
        engine.connect_and_subscribe().await.unwrap();
        advance().await;
        assert_eq!(engine.connections().assigned_shard(first), universe[0..2].to_vec());
        assert_eq!(engine.connections().assigned_shard(second), universe[2..4].to_vec());
        assert_eq!(subscribed(&transport, first), [universe[0..2].to_vec(), universe[0..2].to_vec()].concat());
    }

    #[tokio::test(start_paused = true)]
    async fn end_session_unsubscribes_then_disconnects() {
        let transport = Arc::new(FakeTransport::default());
        let engine = engine(&["a"], symbols(5), &transport);

        engine.start_session().await.unwrap();
        engine.end_session().await;
        advance().await;

        let sent = transport.sent(ConnectionId::new(1));
        assert_eq!(sent.len(), 10);
        assert!(sent[5..].iter().all(|c| *c == SubscriptionCommand::unsubscribe(c.symbol.clone())));
        assert!(!engine.is_any_connected());
        assert_eq!(transport.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_credentials_is_reported_to_admin_callers() {
        let transport = Arc::new(FakeTransport::default());
        let engine = engine(&["", "  "], symbols(5), &transport);

        assert!(matches!(engine.connect_all().await, Err(EngineError::NoCredentials)));
        assert!(matches!(
            engine.connect_and_subscribe().await,
            Err(EngineError::NoCredentials)
        ));
        assert!(!engine.is_any_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn data_saving_flag_round_trips() {
        let transport = Arc::new(FakeTransport::default());
        let engine = engine(&["a"], symbols(1), &transport);

        assert!(!engine.is_data_saving_enabled());
        engine.set_data_saving_enabled(true);
        assert!(engine.is_data_saving_enabled());
        SessionLifecycle::set_data_saving_enabled(&engine, false);
        assert!(!engine.is_data_saving_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_further_admin_calls() {
        let transport = Arc::new(FakeTransport::default());
        let engine = engine(&["a"], symbols(3), &transport);

        engine.connect_and_subscribe().await.unwrap();
        engine.shutdown().await;

        assert!(matches!(engine.connect_all().await, Err(EngineError::ShutDown)));
        assert!(!engine.is_any_connected());
        assert_eq!(transport.live_sessions(), 0);
    }
}
