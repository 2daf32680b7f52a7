//! Session Lifecycle Port (Driver Port)
//!
//! The primitives the schedule controller and health monitor drive. Both
//! converge on the same connect-and-subscribe sequence, so every operation
//! must be safe to call redundantly.

use async_trait::async_trait;

use crate::application::error::EngineError;

/// Session start/stop primitives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionLifecycle: Send + Sync {
    /// Connect every valid credential and subscribe the current universe.
    async fn start_session(&self) -> Result<(), EngineError>;

    /// Unsubscribe and disconnect every connection.
    async fn end_session(&self);

    /// Set the process-wide persistence flag.
    fn set_data_saving_enabled(&self, enabled: bool);

    /// Current persistence flag.
    fn is_data_saving_enabled(&self) -> bool;

    /// Whether at least one connection is live.
    fn is_any_connected(&self) -> bool;
}
