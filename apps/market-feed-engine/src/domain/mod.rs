//! Domain Layer - Core ingestion types and business rules.
//!
//! Pure types with no I/O: connection identity, trade ticks and records,
//! symbol partitioning, feed control messages, and the market calendar.

/// Connection identifiers and the upstream credential pool.
pub mod connection;

/// Decoded upstream feed messages and subscription commands.
pub mod feed;

/// Deterministic symbol sharding across live connections.
pub mod partition;

/// Market hours calendar and schedule state.
pub mod schedule;

/// Trade ticks and persisted trade records.
pub mod trade;
