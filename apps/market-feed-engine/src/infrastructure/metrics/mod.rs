//! Prometheus Metrics Module
//!
//! Exposes engine metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by kind, upstream errors by kind
//! - **Trades**: Received, persisted, throttled and failed writes
//! - **Connections**: Live connection count and reconnect attempts
//! - **Subscriptions**: Control frames sent, symbols left unassigned
//! - **Schedule**: Current schedule state and the persistence flag
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::feed::{SubscriptionAction, UpstreamErrorKind};
use crate::domain::schedule::ScheduleState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "feed_engine_frames_received_total",
        "Total inbound frames received from the upstream feed, by kind"
    );
    describe_counter!(
        "feed_engine_upstream_errors_total",
        "Total upstream error frames, by kind"
    );

    // Trade counters
    describe_counter!(
        "feed_engine_trades_received_total",
        "Total trade ticks received"
    );
    describe_counter!(
        "feed_engine_trades_persisted_total",
        "Total trade records written to storage"
    );
    describe_counter!(
        "feed_engine_trades_throttled_total",
        "Total trade ticks skipped by the per-symbol save interval"
    );
    describe_counter!(
        "feed_engine_persist_failures_total",
        "Total failed trade writes"
    );

    // Connection metrics
    describe_gauge!(
        "feed_engine_live_connections",
        "Number of live upstream connections"
    );
    describe_counter!(
        "feed_engine_reconnects_total",
        "Total reconnect attempts scheduled"
    );

    // Subscription metrics
    describe_counter!(
        "feed_engine_subscription_messages_total",
        "Total subscription control frames queued, by action"
    );
    describe_gauge!(
        "feed_engine_unassigned_symbols",
        "Symbols beyond total connection capacity in the last subscription cycle"
    );

    // Schedule gauges
    describe_gauge!(
        "feed_engine_schedule_state",
        "Current schedule state (0 idle, 1 preparing, 2 active)"
    );
    describe_gauge!(
        "feed_engine_data_saving_enabled",
        "Whether trade persistence is enabled (0/1)"
    );

    // Latency histograms
    describe_histogram!(
        "feed_engine_persist_seconds",
        "Time to write one trade record"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound frame kinds.
#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Trade batch.
    Trade,
    /// Upstream keep-alive.
    Ping,
    /// Upstream error.
    Error,
    /// Unrecognised type.
    Unknown,
    /// Undecodable frame.
    Malformed,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Ping => "ping",
            Self::Error => "error",
            Self::Unknown => "unknown",
            Self::Malformed => "malformed",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame(kind: FrameKind) {
    counter!(
        "feed_engine_frames_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record an upstream error frame.
pub fn record_upstream_error(kind: UpstreamErrorKind) {
    counter!(
        "feed_engine_upstream_errors_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record received trade ticks.
pub fn record_trades_received(count: u64) {
    counter!("feed_engine_trades_received_total").increment(count);
}

/// Record a successful trade write.
pub fn record_trade_persisted(duration: Duration) {
    counter!("feed_engine_trades_persisted_total").increment(1);
    histogram!("feed_engine_persist_seconds").record(duration.as_secs_f64());
}

/// Record a tick skipped by the save interval.
pub fn record_trade_throttled() {
    counter!("feed_engine_trades_throttled_total").increment(1);
}

/// Record a failed trade write.
pub fn record_persist_failure() {
    counter!("feed_engine_persist_failures_total").increment(1);
}

/// Update the live connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_connections(count: usize) {
    gauge!("feed_engine_live_connections").set(count as f64);
}

/// Record a scheduled reconnect attempt.
pub fn record_reconnect() {
    counter!("feed_engine_reconnects_total").increment(1);
}

/// Record queued subscription control frames.
pub fn record_subscription_messages(action: SubscriptionAction, count: u64) {
    counter!(
        "feed_engine_subscription_messages_total",
        "action" => action.as_str()
    )
    .increment(count);
}

/// Update the unassigned symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_unassigned_symbols(count: usize) {
    gauge!("feed_engine_unassigned_symbols").set(count as f64);
}

/// Update the schedule state gauge.
pub fn set_schedule_state(state: ScheduleState) {
    gauge!("feed_engine_schedule_state").set(state.as_gauge());
}

/// Update the persistence flag gauge.
pub fn set_data_saving_enabled(enabled: bool) {
    gauge!("feed_engine_data_saving_enabled").set(if enabled { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_as_str() {
        assert_eq!(FrameKind::Trade.as_str(), "trade");
        assert_eq!(FrameKind::Ping.as_str(), "ping");
        assert_eq!(FrameKind::Error.as_str(), "error");
        assert_eq!(FrameKind::Unknown.as_str(), "unknown");
        assert_eq!(FrameKind::Malformed.as_str(), "malformed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame(FrameKind::Trade);
        record_trades_received(3);
        record_trade_throttled();
        set_live_connections(2);
        set_schedule_state(ScheduleState::SessionActive);
    }
}
