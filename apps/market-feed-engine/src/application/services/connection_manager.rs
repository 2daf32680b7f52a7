//! Connection Manager
//!
//! Owns one supervised upstream session per valid credential.
//!
//! # Supervision
//!
//! Each connection runs as a restartable worker task:
//!
//! ```text
//!   open ──ok──► Connected ──► drive session ──closed──► Disconnected ─┐
//!     ▲   └─err─────────────────────────────────────────────────────────┤
//!     └──────────────── sleep(policy.next_delay()) ◄────────────────────┘
//! ```
//!
//! The worker owns its [`ReconnectPolicy`]; a closed session is never reused,
//! every attempt opens a fresh one. Transport events become [`FeedEvent`]s on
//! a per-connection channel drained by a pump task into the event handler, so
//! the handler never runs on the transport's task.
//!
//! After every successful (re)connect the worker replays subscriptions for the
//! shard the connection was last assigned, with the same batch pacing as the
//! subscription driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::subscriptions::send_paced;
use crate::application::ports::{
    FeedEvent, FeedEventHandler, FeedSession, FeedTransport, SessionEvent,
};
use crate::domain::connection::{ConnectionId, Credential, CredentialPool};
use crate::domain::feed::{SubscribePacing, SubscriptionCommand};
use crate::domain::trade::Symbol;
use crate::infrastructure::metrics;

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Delay between consecutive handshakes in one connect cycle.
    pub connect_stagger: Duration,
    /// Restart policy for each connection.
    pub reconnect: ReconnectConfig,
    /// Pacing for subscription replay after a reconnect.
    pub pacing: SubscribePacing,
    /// Capacity of each connection's event channel.
    pub event_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_stagger: Duration::from_secs(2),
            reconnect: ReconnectConfig::default(),
            pacing: SubscribePacing::default(),
            event_buffer: 1024,
        }
    }
}

/// Shared state of one connection instance.
#[derive(Debug)]
struct ConnectionSlot {
    id: ConnectionId,
    connected: AtomicBool,
    finished: AtomicBool,
    assigned: RwLock<Vec<Symbol>>,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
    cancel: CancellationToken,
}

impl ConnectionSlot {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// A slot is alive while its worker is still supervising it.
    fn is_alive(&self) -> bool {
        !self.finished.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}

/// One supervised session per credential.
pub struct ConnectionManager {
    pool: CredentialPool,
    transport: Arc<dyn FeedTransport>,
    handler: Arc<dyn FeedEventHandler>,
    config: ManagerConfig,
    slots: RwLock<BTreeMap<ConnectionId, Arc<ConnectionSlot>>>,
    live: Arc<AtomicUsize>,
    cycle: Mutex<()>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("credentials", &self.pool.valid_count())
            .field("connections", &self.slots.read().len())
            .field("live", &self.live.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until [`Self::connect_all`].
    #[must_use]
    pub fn new(
        pool: CredentialPool,
        transport: Arc<dyn FeedTransport>,
        handler: Arc<dyn FeedEventHandler>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            handler,
            config,
            slots: RwLock::new(BTreeMap::new()),
            live: Arc::new(AtomicUsize::new(0)),
            cycle: Mutex::new(()),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Number of usable credentials.
    #[must_use]
    pub fn valid_credential_count(&self) -> usize {
        self.pool.valid_count()
    }

    /// Start a connection for every valid credential that has none, waiting
    /// `connect_stagger` between handshakes. Connections that are already
    /// supervised are left alone. Returns the number started.
    ///
    /// Connect failures are handled by each connection's restart policy and
    /// never surface here.
    pub async fn connect_all(&self) -> usize {
        let _cycle = self.cycle.lock().await;

        if self.pool.valid_count() == 0 {
            tracing::error!(
                configured = self.pool.len(),
                "No valid feed credentials; engine will not connect"
            );
            return 0;
        }

        let mut started = 0;
        for (id, credential) in self.pool.valid() {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.slots.read().get(&id).is_some_and(|slot| slot.is_alive()) {
                continue;
            }
            if started > 0 {
                tokio::select! {
                    () = self.shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.config.connect_stagger) => {}
                }
            }
            self.spawn_connection(id, credential.clone());
            started += 1;
        }

        tracing::info!(
            started,
            credentials = self.pool.valid_count(),
            "Connect cycle complete"
        );
        started
    }

    fn spawn_connection(&self, id: ConnectionId, credential: Credential) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));

        let slot = Arc::new(ConnectionSlot {
            id,
            connected: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            assigned: RwLock::new(Vec::new()),
            commands: command_tx,
            cancel: self.shutdown.child_token(),
        });
        if let Some(previous) = self.slots.write().insert(id, slot.clone()) {
            previous.cancel.cancel();
        }

        let worker = ConnectionWorker {
            slot,
            credential,
            transport: self.transport.clone(),
            events: event_tx,
            commands: command_rx,
            reconnect: self.config.reconnect.clone(),
            pacing: self.config.pacing,
            live: self.live.clone(),
        };

        tracing::debug!(connection = %id, "Starting connection worker");
        self.tasks.spawn(worker.run());
        self.tasks.spawn(pump_events(event_rx, self.handler.clone()));
    }

    /// Close every connection and forget all shard assignments.
    pub async fn disconnect_all(&self) {
        let _cycle = self.cycle.lock().await;
        let slots = std::mem::take(&mut *self.slots.write());
        for slot in slots.values() {
            slot.cancel.cancel();
        }
        tracing::info!(connections = slots.len(), "Disconnected all feed connections");
    }

    /// Whether at least one connection is live.
    #[must_use]
    pub fn is_any_connected(&self) -> bool {
        self.slots.read().values().any(|slot| slot.is_connected())
    }

    /// Per-credential liveness. Every valid credential appears; those without
    /// a live session report `false`.
    #[must_use]
    pub fn connection_status(&self) -> BTreeMap<ConnectionId, bool> {
        let slots = self.slots.read();
        self.pool
            .valid()
            .map(|(id, _)| (id, slots.get(&id).is_some_and(|slot| slot.is_connected())))
            .collect()
    }

    /// Ids of live connections, ascending.
    #[must_use]
    pub fn connected_ids(&self) -> Vec<ConnectionId> {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.is_connected())
            .map(|slot| slot.id)
            .collect()
    }

    /// Ids of every connection slot, live or reconnecting, ascending.
    #[must_use]
    pub fn slot_ids(&self) -> Vec<ConnectionId> {
        self.slots.read().keys().copied().collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.is_connected())
            .count()
    }

    /// Shard last assigned to `id`.
    #[must_use]
    pub fn assigned_shard(&self, id: ConnectionId) -> Vec<Symbol> {
        self.slots
            .read()
            .get(&id)
            .map(|slot| slot.assigned.read().clone())
            .unwrap_or_default()
    }

    /// Remember `symbols` as the shard of `id`. Returns `false` when the
    /// connection does not exist.
    pub fn assign_shard(&self, id: ConnectionId, symbols: Vec<Symbol>) -> bool {
        self.slots.read().get(&id).is_some_and(|slot| {
            *slot.assigned.write() = symbols;
            true
        })
    }

    /// Queue a control frame on `id`. Fire-and-forget: returns `false` only
    /// when the connection does not exist.
    pub fn send_command(&self, id: ConnectionId, command: SubscriptionCommand) -> bool {
        self.slots
            .read()
            .get(&id)
            .is_some_and(|slot| slot.commands.send(command).is_ok())
    }

    /// Cancel every connection and wait for all workers to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.slots.write().clear();
        self.tasks.close();
        self.tasks.wait().await;
        metrics::set_live_connections(0);
        tracing::info!("Connection manager stopped");
    }
}

/// Drains one connection's events into the handler.
async fn pump_events(mut events: mpsc::Receiver<FeedEvent>, handler: Arc<dyn FeedEventHandler>) {
    while let Some(event) = events.recv().await {
        handler.handle(event).await;
    }
}

/// Supervisor for one connection instance.
struct ConnectionWorker {
    slot: Arc<ConnectionSlot>,
    credential: Credential,
    transport: Arc<dyn FeedTransport>,
    events: mpsc::Sender<FeedEvent>,
    commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    reconnect: ReconnectConfig,
    pacing: SubscribePacing,
    live: Arc<AtomicUsize>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let id = self.slot.id;
        let cancel = self.slot.cancel.clone();
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());

        loop {
            let opened = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.transport.open(id, &self.credential) => result,
            };

            match opened {
                Ok(mut session) => {
                    policy.reset();
                    self.set_connected(true);
                    tracing::info!(connection = %id, "Feed connection established");
                    self.emit(FeedEvent::Connected { connection: id }).await;

                    let reason = self.drive(session.as_mut(), &cancel).await;
                    session.close().await;

                    self.set_connected(false);
                    tracing::warn!(connection = %id, reason = %reason, "Feed connection closed");
                    self.emit(FeedEvent::Disconnected {
                        connection: id,
                        reason,
                    })
                    .await;
                }
                Err(e) => {
                    tracing::warn!(connection = %id, error = %e, "Feed connect failed");
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    connection = %id,
                    attempts = policy.attempt_count(),
                    "Reconnect attempts exhausted; connection abandoned"
                );
                break;
            };

            metrics::record_reconnect();
            tracing::info!(
                connection = %id,
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            self.emit(FeedEvent::Reconnecting {
                connection: id,
                attempt: policy.attempt_count(),
                delay,
            })
            .await;

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.slot.finished.store(true, Ordering::SeqCst);
        tracing::debug!(connection = %id, "Connection worker stopped");
    }

    /// Pump one open session until it closes or the connection is cancelled.
    async fn drive(&mut self, session: &mut dyn FeedSession, cancel: &CancellationToken) -> String {
        let id = self.slot.id;

        // Commands queued for the previous session are covered by the replay.
        while self.commands.try_recv().is_ok() {}

        let session_scope = cancel.child_token();
        self.spawn_restore(session_scope.clone());

        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // Flush what was queued before the disconnect (unsubscribes).
                    while let Ok(command) = self.commands.try_recv() {
                        if session.send(&command).await.is_err() {
                            break;
                        }
                    }
                    break "disconnect requested".to_string();
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break "command channel closed".to_string();
                    };
                    if let Err(e) = session.send(&command).await {
                        break e.to_string();
                    }
                }
                event = session.next_event() => match event {
                    SessionEvent::Message(message) => {
                        self.emit(FeedEvent::Message { connection: id, message }).await;
                    }
                    SessionEvent::Malformed(error) => {
                        self.emit(FeedEvent::Malformed { connection: id, error }).await;
                    }
                    SessionEvent::Closed(reason) => break reason,
                },
            }
        };

        session_scope.cancel();
        reason
    }

    /// Replay the remembered shard on the fresh session.
    fn spawn_restore(&self, scope: CancellationToken) {
        let symbols = self.slot.assigned.read().clone();
        if symbols.is_empty() {
            return;
        }

        let id = self.slot.id;
        let commands: Vec<_> = symbols.into_iter().map(SubscriptionCommand::subscribe).collect();
        let sender = self.slot.commands.clone();
        let pacing = self.pacing;

        tokio::spawn(async move {
            tokio::select! {
                () = scope.cancelled() => {}
                sent = send_paced(commands, pacing, |command| sender.send(command).is_ok()) => {
                    tracing::info!(connection = %id, symbols = sent, "Restored subscriptions");
                }
            }
        });
    }

    fn set_connected(&self, connected: bool) {
        let previous = self.slot.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            return;
        }
        let live = if connected {
            self.live.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.live.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
        };
        metrics::set_live_connections(live);
    }

    async fn emit(&self, event: FeedEvent) {
        // The pump only stops once every sender is gone.
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::test_support::{
        FakeTransport, RecordingHandler, advance, pool,
    };
    use crate::domain::feed::FeedMessage;
    use tokio::time::Instant;

    fn config() -> ManagerConfig {
        ManagerConfig {
            connect_stagger: Duration::from_secs(2),
            reconnect: ReconnectConfig::fixed(Duration::from_secs(5)),
            pacing: SubscribePacing::default(),
            event_buffer: 64,
        }
    }

    fn manager(tokens: &[&str], transport: &Arc<FakeTransport>) -> (ConnectionManager, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let manager = ConnectionManager::new(pool(tokens), transport.clone(), handler.clone(), config());
        (manager, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn connects_one_session_per_valid_credential_staggered() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager(&["a", "b", "c"], &transport);

        let started_at = Instant::now();
        assert_eq!(manager.connect_all().await, 3);
        let elapsed = started_at.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));

        advance().await;
        assert_eq!(manager.live_count(), 3);
        assert_eq!(
            manager.connected_ids(),
            vec![ConnectionId::new(1), ConnectionId::new(2), ConnectionId::new(3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_pool_runs_with_remaining_credentials() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager(&["", "b", "  "], &transport);

        assert_eq!(manager.connect_all().await, 1);
        advance().await;

        assert!(manager.is_any_connected());
        let status = manager.connection_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status.get(&ConnectionId::new(2)), Some(&true));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_is_a_noop() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager(&[], &transport);

        assert_eq!(manager.connect_all().await, 0);
        assert!(!manager.is_any_connected());
        assert!(manager.connection_status().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_all_is_idempotent() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager(&["a", "b"], &transport);

        manager.connect_all().await;
        advance().await;
        assert_eq!(manager.connect_all().await, 0);
        assert_eq!(transport.open_count(ConnectionId::new(1)), 1);
        assert_eq!(transport.open_count(ConnectionId::new(2)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_retries_on_fixed_delay() {
        let transport = Arc::new(FakeTransport::rejecting(&["bad"]));
        let (manager, handler) = manager(&["bad"], &transport);

        manager.connect_all().await;
        advance().await;
        assert!(!manager.is_any_connected());
        assert_eq!(transport.open_count(ConnectionId::new(1)), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        advance().await;
        assert_eq!(transport.open_count(ConnectionId::new(1)), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        advance().await;
        assert_eq!(transport.open_count(ConnectionId::new(1)), 4);
        assert!(handler.reconnect_attempts().iter().all(|attempt| *attempt >= 1));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_restores_remembered_shard() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, handler) = manager(&["a"], &transport);
        let id = ConnectionId::new(1);

        manager.connect_all().await;
        advance().await;
        assert!(manager.assign_shard(id, vec!["AAPL".to_string(), "MSFT".to_string()]));

        transport.close_session(id, "server restart");
        advance().await;
        assert!(!manager.is_any_connected());

        tokio::time::sleep(Duration::from_secs(5)).await;
        advance().await;

        assert!(manager.is_any_connected());
        assert_eq!(transport.open_count(id), 2);
        assert_eq!(
            transport.sent(id),
            vec![
                SubscriptionCommand::subscribe("AAPL"),
                SubscriptionCommand::subscribe("MSFT"),
            ]
        );
        assert_eq!(handler.connected_count(id), 2);
        assert_eq!(handler.disconnected_count(id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_the_handler() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, handler) = manager(&["a"], &transport);
        let id = ConnectionId::new(1);

        manager.connect_all().await;
        advance().await;
        transport.push(id, SessionEvent::Message(FeedMessage::Ping));
        transport.push(id, SessionEvent::Malformed("bad json".to_string()));
        advance().await;

        assert_eq!(handler.messages(id), vec![FeedMessage::Ping]);
        assert_eq!(handler.malformed_count(id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_forwarded_to_the_session() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager(&["a"], &transport);
        let id = ConnectionId::new(1);

        manager.connect_all().await;
        advance().await;
        assert!(manager.send_command(id, SubscriptionCommand::subscribe("TSLA")));
        assert!(!manager.send_command(ConnectionId::new(9), SubscriptionCommand::subscribe("X")));
        advance().await;

        assert_eq!(transport.sent(id), vec![SubscriptionCommand::subscribe("TSLA")]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_all_resets_status_and_stops_reconnects() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager(&["a", "b"], &transport);

        manager.connect_all().await;
        advance().await;
        manager.disconnect_all().await;
        advance().await;

        assert!(!manager.is_any_connected());
        assert!(manager.connection_status().values().all(|live| !live));
        assert!(manager.assigned_shard(ConnectionId::new(1)).is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        advance().await;
        assert_eq!(transport.open_count(ConnectionId::new(1)), 1);

        // A new cycle replaces the discarded instances.
        assert_eq!(manager.connect_all().await, 2);
        advance().await;
        assert_eq!(transport.open_count(ConnectionId::new(1)), 2);
        assert!(manager.is_any_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_workers() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager(&["a"], &transport);

        manager.connect_all().await;
        advance().await;
        manager.shutdown().await;

        assert!(!manager.is_any_connected());
        assert_eq!(manager.connect_all().await, 0);
    }
}
