//! In-process fakes shared by the service unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{
    FeedEvent, FeedEventHandler, FeedSession, FeedTransport, SessionEvent, TransportError,
};
use crate::domain::connection::{ConnectionId, Credential, CredentialPool};
use crate::domain::feed::{FeedMessage, SubscriptionCommand};

/// Let spawned tasks run; advances paused time by 10ms.
pub async fn advance() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn pool(tokens: &[&str]) -> CredentialPool {
    CredentialPool::new(tokens.iter().map(|t| Credential::new(*t)).collect())
}

/// Channel-backed upstream. Tokens in `rejected` fail the handshake.
#[derive(Default)]
pub struct FakeTransport {
    rejected: HashSet<String>,
    inbound: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<SessionEvent>>>,
    sent: std::sync::Arc<Mutex<Vec<(ConnectionId, SubscriptionCommand)>>>,
    opens: Mutex<HashMap<ConnectionId, usize>>,
    live_sessions: std::sync::Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn rejecting(tokens: &[&str]) -> Self {
        Self {
            rejected: tokens.iter().map(|t| (*t).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn open_count(&self, id: ConnectionId) -> usize {
        self.opens.lock().get(&id).copied().unwrap_or(0)
    }

    pub fn push(&self, id: ConnectionId, event: SessionEvent) {
        if let Some(tx) = self.inbound.lock().get(&id) {
            let _ = tx.send(event);
        }
    }

    pub fn close_session(&self, id: ConnectionId, reason: &str) {
        self.push(id, SessionEvent::Closed(reason.to_string()));
    }

    pub fn sent(&self, id: ConnectionId) -> Vec<SubscriptionCommand> {
        self.sent
            .lock()
            .iter()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn open(
        &self,
        connection: ConnectionId,
        credential: &Credential,
    ) -> Result<Box<dyn FeedSession>, TransportError> {
        *self.opens.lock().entry(connection).or_default() += 1;
        if self.rejected.contains(credential.token()) {
            return Err(TransportError::Connect {
                message: "401 Unauthorized".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inbound.lock().insert(connection, tx);
        self.live_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            id: connection,
            inbound: rx,
            sent: self.sent.clone(),
            live_sessions: self.live_sessions.clone(),
            open: true,
        }))
    }
}

struct FakeSession {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<SessionEvent>,
    sent: std::sync::Arc<Mutex<Vec<(ConnectionId, SubscriptionCommand)>>>,
    live_sessions: std::sync::Arc<AtomicUsize>,
    open: bool,
}

#[async_trait]
impl FeedSession for FakeSession {
    async fn send(&mut self, command: &SubscriptionCommand) -> Result<(), TransportError> {
        self.sent.lock().push((self.id, command.clone()));
        Ok(())
    }

    async fn next_event(&mut self) -> SessionEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| SessionEvent::Closed("remote dropped".to_string()))
    }

    async fn close(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.live_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<FeedEvent>>,
}

impl RecordingHandler {
    fn count(&self, matches: impl Fn(&FeedEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    pub fn connected_count(&self, id: ConnectionId) -> usize {
        self.count(|e| matches!(e, FeedEvent::Connected { connection } if *connection == id))
    }

    pub fn disconnected_count(&self, id: ConnectionId) -> usize {
        self.count(|e| matches!(e, FeedEvent::Disconnected { connection, .. } if *connection == id))
    }

    pub fn malformed_count(&self, id: ConnectionId) -> usize {
        self.count(|e| matches!(e, FeedEvent::Malformed { connection, .. } if *connection == id))
    }

    pub fn messages(&self, id: ConnectionId) -> Vec<FeedMessage> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                FeedEvent::Message {
                    connection,
                    message,
                } if *connection == id => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reconnect_attempts(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                FeedEvent::Reconnecting { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl FeedEventHandler for RecordingHandler {
    async fn handle(&self, event: FeedEvent) {
        self.events.lock().push(event);
    }
}
