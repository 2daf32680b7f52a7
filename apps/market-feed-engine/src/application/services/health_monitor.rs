//! Health Monitor
//!
//! Periodically compares actual connection liveness with what the schedule
//! expects. When a session is expected but nothing is live, it asks the
//! schedule controller to restart it. The restart runs under the controller's
//! transition lock, so it can never land after a close has ended the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::scheduler::ScheduleController;
use crate::application::ports::SessionLifecycle;

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// No session expected; nothing to check.
    Idle,
    /// Session expected and at least one connection is live.
    Healthy,
    /// Connectivity came back since the last check.
    Recovered,
    /// Session expected but nothing live; a reconnect cycle was triggered.
    Recovering,
}

/// Liveness supervisor.
pub struct HealthMonitor {
    lifecycle: Arc<dyn SessionLifecycle>,
    controller: Arc<ScheduleController>,
    interval: Duration,
    degraded: AtomicBool,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create a monitor checking every `interval`.
    #[must_use]
    pub const fn new(
        lifecycle: Arc<dyn SessionLifecycle>,
        controller: Arc<ScheduleController>,
        interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            controller,
            interval,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the last check found an expected session with no live
    /// connection.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Run one check.
    pub async fn check(&self) -> HealthCheck {
        if !self.controller.session_expected() {
            self.degraded.store(false, Ordering::SeqCst);
            return HealthCheck::Idle;
        }

        if self.lifecycle.is_any_connected() {
            if self.degraded.swap(false, Ordering::SeqCst) {
                tracing::info!("Feed connectivity restored");
                return HealthCheck::Recovered;
            }
            return HealthCheck::Healthy;
        }

        tracing::warn!(
            state = self.controller.state().as_str(),
            "No live feed connection during session; starting reconnect cycle"
        );
        match self.controller.resume_session().await {
            Ok(false) => {
                self.degraded.store(false, Ordering::SeqCst);
                return HealthCheck::Idle;
            }
            Ok(true) => {}
            Err(e) => tracing::error!(error = %e, "Reconnect cycle could not start"),
        }
        self.degraded.store(true, Ordering::SeqCst);
        HealthCheck::Recovering
    }

    /// Check on the configured interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup is not
        // mistaken for an outage.
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Health monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.check().await;
                }
            }
        }
    }
}
