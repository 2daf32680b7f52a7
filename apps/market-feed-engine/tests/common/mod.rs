//! Shared fixtures for the integration tests: a local WebSocket feed server
//! and a fully wired engine pointed at it.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use market_feed_engine::application::services::{
    ConnectionManager, ManagerConfig, MessageRouter, ReconnectConfig, SubscriptionDriver,
    TradeCoalescer,
};
use market_feed_engine::domain::feed::SubscribePacing;
use market_feed_engine::infrastructure::feed::{HeartbeatConfig, WebSocketTransport};
use market_feed_engine::infrastructure::persistence::InMemoryTradeStore;
use market_feed_engine::infrastructure::universe::StaticSymbolUniverse;
use market_feed_engine::{Credential, CredentialPool, FeedEngine};

// =============================================================================
// Local feed server
// =============================================================================

/// WebSocket server standing in for the upstream feed. Sessions are keyed by
/// the `token` query parameter; tokens starting with `bad` are refused.
pub struct LocalFeed {
    pub url: String,
    frames: Arc<Mutex<Vec<(String, String)>>>,
    outbound: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl LocalFeed {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let frames = Arc::new(Mutex::new(Vec::new()));
        let outbound = Arc::new(Mutex::new(HashMap::new()));

        let accept_frames = Arc::clone(&frames);
        let accept_outbound = Arc::clone(&outbound);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(
                    socket,
                    Arc::clone(&accept_frames),
                    Arc::clone(&accept_outbound),
                ));
            }
        });

        Self {
            url,
            frames,
            outbound,
        }
    }

    /// Text frames received on the session opened with `token`.
    pub fn received(&self, token: &str) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter(|(owner, _)| owner == token)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn received_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn push(&self, token: &str, frame: &str) {
        let sender = self.outbound.lock().get(token).cloned();
        sender.expect("session not open").send(frame.to_string()).unwrap();
    }
}

async fn serve(
    socket: tokio::net::TcpStream,
    frames: Arc<Mutex<Vec<(String, String)>>>,
    outbound: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
) {
    let token = Arc::new(Mutex::new(String::new()));
    let seen = Arc::clone(&token);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let value = request
            .uri()
            .query()
            .and_then(|q| q.strip_prefix("token="))
            .unwrap_or_default()
            .to_string();
        if value.starts_with("bad") {
            let mut refusal = ErrorResponse::new(Some("invalid token".to_string()));
            *refusal.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(refusal);
        }
        *seen.lock() = value;
        Ok(response)
    };

    let Ok(stream) = tokio_tungstenite::accept_hdr_async(socket, callback).await else {
        return;
    };
    let token = token.lock().clone();
    let (mut write, mut read) = stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    outbound.lock().insert(token.clone(), tx);

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = read.next().await {
        match message {
            Message::Text(text) => frames.lock().push((token.clone(), text.as_str().to_string())),
            Message::Close(_) => break,
            _ => {}
        }
    }
    outbound.lock().remove(&token);
}

// =============================================================================
// Engine wiring
// =============================================================================

pub struct Harness {
    pub feed: LocalFeed,
    pub engine: Arc<FeedEngine>,
    pub store: Arc<InMemoryTradeStore>,
}

pub async fn harness(tokens: &[&str], universe: &[&str], capacity: usize) -> Harness {
    let feed = LocalFeed::start().await;
    let store = Arc::new(InMemoryTradeStore::new());
    let coalescer = Arc::new(TradeCoalescer::new(
        Arc::clone(&store) as _,
        Duration::from_secs(10),
    ));
    let pacing = SubscribePacing {
        batch_size: 10,
        pause: Duration::from_millis(5),
    };
    let connections = Arc::new(ConnectionManager::new(
        CredentialPool::new(tokens.iter().map(|t| Credential::new(*t)).collect()),
        Arc::new(WebSocketTransport::new(
            feed.url.clone(),
            HeartbeatConfig::default(),
        )),
        Arc::new(MessageRouter::new(Arc::clone(&coalescer))),
        ManagerConfig {
            connect_stagger: Duration::from_millis(10),
            reconnect: ReconnectConfig::fixed(Duration::from_secs(5)),
            pacing,
            event_buffer: 64,
        },
    ));
    let driver = SubscriptionDriver::new(Arc::clone(&connections), capacity, pacing);
    let engine = Arc::new(FeedEngine::new(
        connections,
        driver,
        coalescer,
        Arc::new(StaticSymbolUniverse::new(
            universe.iter().map(ToString::to_string).collect(),
        )),
        Duration::from_millis(300),
    ));

    Harness {
        feed,
        engine,
        store,
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn subscribe(symbol: &str) -> String {
    format!(r#"{{"type":"subscribe","symbol":"{symbol}"}}"#)
}

pub fn unsubscribe(symbol: &str) -> String {
    format!(r#"{{"type":"unsubscribe","symbol":"{symbol}"}}"#)
}
