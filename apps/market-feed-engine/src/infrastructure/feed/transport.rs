//! WebSocket Transport
//!
//! [`FeedTransport`] adapter over `tokio-tungstenite`. Each [`open`] performs
//! one handshake against `{url}?token={credential}`; the returned session
//! decodes text frames with [`FeedCodec`] and keeps itself alive with
//! WebSocket pings.
//!
//! The session URL carries the credential, so it is never logged.
//!
//! [`open`]: FeedTransport::open

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec::FeedCodec;
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
use crate::application::ports::{FeedSession, FeedTransport, SessionEvent, TransportError};
use crate::domain::connection::{ConnectionId, Credential};
use crate::domain::feed::SubscriptionCommand;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Append the credential to the feed URL.
fn session_url(base: &str, credential: &Credential) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}token={}", credential.token())
}

/// Opens WebSocket sessions against the trade feed.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    heartbeat: HeartbeatConfig,
    codec: FeedCodec,
}

impl WebSocketTransport {
    /// Create a transport for the feed at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, heartbeat: HeartbeatConfig) -> Self {
        Self {
            url: url.into(),
            heartbeat,
            codec: FeedCodec::new(),
        }
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn open(
        &self,
        connection: ConnectionId,
        credential: &Credential,
    ) -> Result<Box<dyn FeedSession>, TransportError> {
        tracing::debug!(connection = %connection, "Opening feed WebSocket");

        let url = session_url(&self.url, credential);
        let (stream, _response) =
            tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    message: e.to_string(),
                })?;

        let (write, read) = stream.split();
        Ok(Box::new(WebSocketSession::new(
            connection,
            write,
            read,
            self.codec.clone(),
            self.heartbeat,
        )))
    }
}

/// One open WebSocket session.
pub struct WebSocketSession {
    connection: ConnectionId,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    codec: FeedCodec,
    heartbeat: HeartbeatState,
    ping: Interval,
}

impl WebSocketSession {
    fn new(
        connection: ConnectionId,
        write: SplitSink<WsStream, Message>,
        read: SplitStream<WsStream>,
        codec: FeedCodec,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        let now = Instant::now();
        let period = heartbeat.ping_interval.max(std::time::Duration::from_millis(1));
        let mut ping = tokio::time::interval_at(now + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            connection,
            write,
            read,
            codec,
            heartbeat: HeartbeatState::new(heartbeat, now),
            ping,
        }
    }

    fn decode(&self, text: &str) -> SessionEvent {
        match self.codec.decode(text) {
            Ok(message) => SessionEvent::Message(message),
            Err(e) => SessionEvent::Malformed(e.to_string()),
        }
    }
}

#[async_trait]
impl FeedSession for WebSocketSession {
    async fn send(&mut self, command: &SubscriptionCommand) -> Result<(), TransportError> {
        let text = self.codec.encode(command).map_err(|e| TransportError::Encode {
            message: e.to_string(),
        })?;
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send {
                message: e.to_string(),
            })
    }

    async fn next_event(&mut self) -> SessionEvent {
        loop {
            tokio::select! {
                _ = self.ping.tick() => match self.heartbeat.on_tick(Instant::now()) {
                    HeartbeatAction::TimedOut(silent) => {
                        tracing::warn!(
                            connection = %self.connection,
                            silent_secs = silent.as_secs(),
                            "Heartbeat timeout"
                        );
                        return SessionEvent::Closed(format!(
                            "heartbeat timeout after {}s",
                            silent.as_secs()
                        ));
                    }
                    HeartbeatAction::SendPing => {
                        if let Err(e) = self.write.send(Message::Ping(vec![].into())).await {
                            return SessionEvent::Closed(e.to_string());
                        }
                    }
                },
                frame = self.read.next() => {
                    let Some(frame) = frame else {
                        return SessionEvent::Closed("stream ended".to_string());
                    };
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => return SessionEvent::Closed(e.to_string()),
                    };
                    self.heartbeat.record_activity(Instant::now());

                    match frame {
                        Message::Text(text) => return self.decode(text.as_str()),
                        Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                            Ok(text) => return self.decode(text),
                            Err(_) => {
                                return SessionEvent::Malformed("non UTF-8 binary frame".to_string());
                            }
                        },
                        Message::Close(frame) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by upstream".to_string());
                            return SessionEvent::Closed(reason);
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            tracing::debug!(connection = %self.connection, error = %e, "WebSocket close failed");
        }
    }
}
