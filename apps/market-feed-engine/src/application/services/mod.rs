//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionManager`: One supervised upstream session per credential
//! - `SubscriptionDriver`: Shards the universe and paces subscribe traffic
//! - `TradeCoalescer`: Latest-trade map and throttled persistence
//! - `MessageRouter`: Dispatches inbound feed events
//! - `FeedEngine`: Facade tying the above into session start/end
//! - `ScheduleController`: Market-hours state machine
//! - `HealthMonitor`: Restarts the session when connectivity is lost

pub mod coalescer;
pub mod connection_manager;
pub mod engine;
pub mod health_monitor;
pub mod reconnect;
pub mod router;
pub mod scheduler;
pub mod subscriptions;

#[cfg(test)]
pub(crate) mod test_support;

pub use coalescer::{EngineStats, TradeCoalescer, TradeOutcome};
pub use connection_manager::{ConnectionManager, ManagerConfig};
pub use engine::FeedEngine;
pub use health_monitor::{HealthCheck, HealthMonitor};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use router::MessageRouter;
pub use scheduler::{ScheduleController, ScheduleStatus};
pub use subscriptions::{SubscriptionDriver, SubscriptionReport};
