//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Environment configuration.
pub mod config;

/// Upstream WebSocket feed adapter (codec, heartbeat, transport).
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Trade store adapters.
pub mod persistence;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;

/// Symbol universe sources.
pub mod universe;
