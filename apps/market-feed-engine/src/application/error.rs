//! Engine Errors
//!
//! Errors surfaced to callers of administrative operations. Nothing on the
//! steady-state message path returns these.

use thiserror::Error;

use super::ports::UniverseError;

/// Errors returned by engine-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The credential pool holds no usable token.
    #[error("no valid feed credentials configured")]
    NoCredentials,

    /// The symbol universe could not be loaded.
    #[error("symbol universe unavailable: {0}")]
    Universe(#[from] UniverseError),

    /// The engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,
}
