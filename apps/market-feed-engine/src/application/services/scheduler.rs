//! Market Schedule Controller
//!
//! Single-writer state machine driving the session lifecycle from the market
//! calendar:
//!
//! | Transition                     | Side effects                                 |
//! |--------------------------------|----------------------------------------------|
//! | `Idle → PreparingSession`      | persistence off, connect and subscribe       |
//! | `PreparingSession → SessionActive` | persistence on                           |
//! | `Idle → SessionActive`         | connect and subscribe, then persistence on   |
//! | `* → Idle`                     | persistence off, unsubscribe and disconnect  |
//!
//! A poll that computes the last-known state is a no-op. Transitions are
//! serialized; the recorded state changes before side effects run so readers
//! never act on a state that is being left.
//!
//! # Administrative overrides
//!
//! - `force_connect` starts a session outside the schedule and marks it as
//!   expected so the health monitor keeps it alive.
//! - `force_disconnect` disables the scheduler and ends the session; the
//!   recorded state returns to `Idle` so re-enabling resynchronises on the
//!   next poll.
//! - `set_enabled` pauses or resumes polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::error::EngineError;
use crate::application::ports::SessionLifecycle;
use crate::domain::schedule::{MarketCalendar, ScheduleState};
use crate::infrastructure::metrics;

/// Point-in-time schedule status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    /// Last state applied by the controller.
    pub state: ScheduleState,
    /// When the calendar next changes state.
    pub next_transition: Option<DateTime<Utc>>,
    /// State the calendar changes to at `next_transition`.
    pub next_state: Option<ScheduleState>,
    /// Whether polling is enabled.
    pub scheduler_enabled: bool,
    /// Whether connections are currently expected to be live.
    pub session_expected: bool,
}

/// Time-driven session state machine.
pub struct ScheduleController {
    calendar: MarketCalendar,
    lifecycle: Arc<dyn SessionLifecycle>,
    poll_interval: Duration,
    state: RwLock<ScheduleState>,
    enabled: AtomicBool,
    manual_session: AtomicBool,
    transition: Mutex<()>,
}

impl std::fmt::Debug for ScheduleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleController")
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ScheduleController {
    /// Create a controller in `Idle`.
    #[must_use]
    pub fn new(
        calendar: MarketCalendar,
        lifecycle: Arc<dyn SessionLifecycle>,
        poll_interval: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            calendar,
            lifecycle,
            poll_interval,
            state: RwLock::new(ScheduleState::Idle),
            enabled: AtomicBool::new(enabled),
            manual_session: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    /// Last state applied.
    #[must_use]
    pub fn state(&self) -> ScheduleState {
        *self.state.read()
    }

    /// Whether polling is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// The calendar in use.
    #[must_use]
    pub const fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// Whether connections should currently be live, either because the
    /// schedule calls for a session or because one was forced.
    #[must_use]
    pub fn session_expected(&self) -> bool {
        self.manual_session.load(Ordering::SeqCst)
            || (self.is_enabled() && self.state().expects_connections())
    }

    /// Status at `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> ScheduleStatus {
        let next = self.calendar.next_transition(now);
        ScheduleStatus {
            state: self.state(),
            next_transition: next.map(|(at, _)| at),
            next_state: next.map(|(_, state)| state),
            scheduler_enabled: self.is_enabled(),
            session_expected: self.session_expected(),
        }
    }

    /// Status now.
    #[must_use]
    pub fn status(&self) -> ScheduleStatus {
        self.status_at(Utc::now())
    }

    /// Evaluate the calendar now.
    pub async fn poll(&self) -> Option<ScheduleState> {
        self.poll_at(Utc::now()).await
    }

    /// Evaluate the calendar at `now` and apply a transition if the computed
    /// state differs from the last one. Returns the new state on transition.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> Option<ScheduleState> {
        if !self.is_enabled() {
            return None;
        }

        let _transition = self.transition.lock().await;
        let target = self.calendar.state_at(now);
        let current = self.state();
        if target == current {
            return None;
        }

        tracing::info!(
            from = current.as_str(),
            to = target.as_str(),
            "Schedule transition"
        );
        *self.state.write() = target;
        metrics::set_schedule_state(target);
        self.apply(current, target).await;
        Some(target)
    }

    async fn apply(&self, from: ScheduleState, to: ScheduleState) {
        match to {
            ScheduleState::PreparingSession => {
                self.lifecycle.set_data_saving_enabled(false);
                self.start_session().await;
            }
            ScheduleState::SessionActive => {
                if !from.expects_connections() {
                    self.start_session().await;
                }
                self.lifecycle.set_data_saving_enabled(true);
            }
            ScheduleState::Idle => {
                self.manual_session.store(false, Ordering::SeqCst);
                self.lifecycle.set_data_saving_enabled(false);
                self.lifecycle.end_session().await;
            }
        }
    }

    async fn start_session(&self) {
        if let Err(e) = self.lifecycle.start_session().await {
            tracing::error!(error = %e, "Scheduled session start failed");
        }
    }

    /// Enable or disable polling. Re-enabling takes effect on the next poll.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::info!(enabled, "Market scheduler toggled");
        }
    }

    /// Start a session regardless of the schedule.
    ///
    /// # Errors
    ///
    /// Returns the engine error when the session cannot even be attempted.
    pub async fn force_connect(&self) -> Result<(), EngineError> {
        let _transition = self.transition.lock().await;
        tracing::info!("Forced connect requested");
        self.manual_session.store(true, Ordering::SeqCst);
        let result = self.lifecycle.start_session().await;
        if result.is_err() {
            self.manual_session.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Restart the session after connectivity was lost, provided one is
    /// still expected once any in-flight transition has finished. Returns
    /// whether a start was attempted.
    ///
    /// # Errors
    ///
    /// Returns the engine error when the session cannot even be attempted.
    pub async fn resume_session(&self) -> Result<bool, EngineError> {
        let _transition = self.transition.lock().await;
        if !self.session_expected() {
            tracing::debug!(state = self.state().as_str(), "Session no longer expected; not reconnecting");
            return Ok(false);
        }
        self.lifecycle.start_session().await?;
        Ok(true)
    }

    /// Disable the scheduler and end the session.
    pub async fn force_disconnect(&self) {
        let _transition = self.transition.lock().await;
        tracing::info!("Forced disconnect requested; scheduler disabled");
        self.enabled.store(false, Ordering::SeqCst);
        self.manual_session.store(false, Ordering::SeqCst);
        *self.state.write() = ScheduleState::Idle;
        metrics::set_schedule_state(ScheduleState::Idle);
        self.lifecycle.set_data_saving_enabled(false);
        self.lifecycle.end_session().await;
    }

    /// Poll on the configured interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            poll_secs = self.poll_interval.as_secs(),
            enabled = self.is_enabled(),
            "Market scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Market scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.poll().await;
                }
            }
        }
    }
}
