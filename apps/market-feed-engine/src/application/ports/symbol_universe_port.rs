//! Symbol Universe Port (Driven Port)
//!
//! Source of the full set of symbols the engine should monitor.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::trade::Symbol;

/// Symbol universe error.
#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    /// The symbol file could not be read.
    #[error("failed to read symbol file {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The catalogue is unreachable.
    #[error("symbol catalogue unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port for reading the current symbol universe.
#[async_trait]
pub trait SymbolUniverse: Send + Sync {
    /// Snapshot of every symbol that should be monitored. Order and
    /// duplicates are irrelevant; the partitioner normalises both.
    async fn symbols(&self) -> Result<Vec<Symbol>, UniverseError>;
}
