//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the engine's services and the port interfaces
//! that define how they reach storage, the symbol catalogue and the
//! upstream feed.

/// Application-level errors returned by administrative operations.
pub mod error;

/// Port interfaces for external systems (feed transport, storage, etc.).
pub mod ports;

/// Application services: connections, subscriptions, coalescing, scheduling.
pub mod services;

pub use error::EngineError;
