//! Heartbeat
//!
//! Tracks session liveness through periodic WebSocket pings. Any inbound
//! frame counts as proof of life; a session that stays silent past the
//! timeout after a ping is considered dead.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the session is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// What the session should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping.
    SendPing,
    /// The session has been silent too long.
    TimedOut(Duration),
}

/// Per-session heartbeat bookkeeping.
#[derive(Debug)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    last_seen: Instant,
    waiting_for_pong: bool,
}

impl HeartbeatState {
    /// Create state for a session opened at `now`.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_seen: now,
            waiting_for_pong: false,
        }
    }

    /// Record that something arrived from the peer.
    pub const fn record_activity(&mut self, now: Instant) {
        self.last_seen = now;
        self.waiting_for_pong = false;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong
    }

    /// Decide what to do on a ping-interval tick.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        let silent = now.saturating_duration_since(self.last_seen);
        if self.waiting_for_pong && silent > self.config.pong_timeout {
            return HeartbeatAction::TimedOut(silent);
        }
        self.waiting_for_pong = true;
        HeartbeatAction::SendPing
    }
}
