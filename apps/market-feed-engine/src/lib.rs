#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Feed Engine - Real-Time Trade Ingestion
//!
//! Holds one upstream WebSocket session per API credential, shards the
//! symbol universe across the live sessions, keeps the latest trade per
//! symbol in memory and persists a throttled trade stream, all on a
//! market-hours schedule with administrative overrides.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `connection`: Connection ids and the credential pool
//!   - `partition`: Deterministic symbol sharding
//!   - `trade`: Trade ticks and persisted records
//!   - `schedule`: Market calendar and schedule states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed transport, trade store, symbol universe, session lifecycle
//!   - `services`: Connection manager, subscription driver, coalescer,
//!     scheduler, health monitor and the engine facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket transport, frame codec and heartbeat
//!   - `persistence`: Turso and in-memory trade stores
//!   - `universe`: Static and file-backed symbol lists
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! token 1 ─► conn-1 ─┐
//! token 2 ─► conn-2 ─┼─► MessageRouter ─► TradeCoalescer ─┬─► latest trade map
//! token N ─► conn-N ─┘                                    └─► TradeStore (≥ interval per symbol)
//!
//! ScheduleController ─► FeedEngine ─► ConnectionManager / SubscriptionDriver
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core ingestion types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionId, Credential, CredentialPool};
pub use domain::partition::{Shard, ShardPlan};
pub use domain::trade::{Symbol, TradeRecord, TradeTick};

// Application
pub use application::EngineError;
pub use application::services::{FeedEngine, ScheduleController, ScheduleStatus};

// Infrastructure config
pub use infrastructure::config::{ConfigError, EngineConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
