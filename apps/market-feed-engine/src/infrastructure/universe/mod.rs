//! Symbol Universe Adapters
//!
//! - [`StaticSymbolUniverse`]: fixed list, typically from `FEED_SYMBOLS`
//! - [`FileSymbolUniverse`]: newline-separated file, re-read on every cycle so
//!   edits take effect at the next resubscribe

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::{SymbolUniverse, UniverseError};
use crate::domain::trade::Symbol;

/// Parse a symbol list. Blank entries and `#` comments are ignored.
#[must_use]
pub fn parse_symbols<'a>(entries: impl IntoIterator<Item = &'a str>) -> Vec<Symbol> {
    entries
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// Fixed symbol universe.
#[derive(Debug, Clone, Default)]
pub struct StaticSymbolUniverse {
    symbols: Vec<Symbol>,
}

impl StaticSymbolUniverse {
    /// Wrap a list of symbols.
    #[must_use]
    pub const fn new(symbols: Vec<Symbol>) -> Self {
        Self { symbols }
    }

    /// Parse a comma-separated list.
    #[must_use]
    pub fn from_csv(list: &str) -> Self {
        Self::new(parse_symbols(list.split(',')))
    }
}

#[async_trait]
impl SymbolUniverse for StaticSymbolUniverse {
    async fn symbols(&self) -> Result<Vec<Symbol>, UniverseError> {
        Ok(self.symbols.clone())
    }
}

/// Symbol universe backed by a text file, one symbol per line.
#[derive(Debug, Clone)]
pub struct FileSymbolUniverse {
    path: PathBuf,
}

impl FileSymbolUniverse {
    /// Read symbols from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SymbolUniverse for FileSymbolUniverse {
    async fn symbols(&self) -> Result<Vec<Symbol>, UniverseError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| UniverseError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        let symbols = parse_symbols(contents.lines());
        tracing::debug!(path = %self.path.display(), symbols = symbols.len(), "Loaded symbol file");
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn csv_list_is_trimmed() {
        let universe = StaticSymbolUniverse::from_csv(" AAPL, MSFT ,,TSLA,");
        assert_eq!(universe.symbols, vec!["AAPL", "MSFT", "TSLA"]);
    }

    #[tokio::test]
    async fn file_universe_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# watchlist\nAAPL\n\n  MSFT  \nBINANCE:BTCUSDT").unwrap();

        let universe = FileSymbolUniverse::new(file.path());
        assert_eq!(
            universe.symbols().await.unwrap(),
            vec!["AAPL", "MSFT", "BINANCE:BTCUSDT"]
        );
    }

    #[tokio::test]
    async fn file_universe_is_reread() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "AAPL").unwrap();
        let universe = FileSymbolUniverse::new(file.path());
        assert_eq!(universe.symbols().await.unwrap(), vec!["AAPL"]);

        writeln!(file, "MSFT").unwrap();
        file.flush().unwrap();
        assert_eq!(universe.symbols().await.unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let universe = FileSymbolUniverse::new("/nonexistent/symbols.txt");
        assert!(matches!(
            universe.symbols().await,
            Err(UniverseError::Io { .. })
        ));
    }
}
