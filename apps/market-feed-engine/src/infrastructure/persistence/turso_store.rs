//! Turso Trade Store
//!
//! [`TradeStore`] backed by an embedded Turso (SQLite-compatible) database.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE trades (
//!     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//!     symbol      TEXT    NOT NULL,
//!     price       TEXT    NOT NULL,  -- decimal string
//!     volume      TEXT    NOT NULL,  -- decimal string
//!     trade_ts    INTEGER NOT NULL,  -- epoch millis
//!     received_ts INTEGER NOT NULL,  -- epoch millis
//!     conditions  TEXT    NOT NULL
//! );
//! CREATE INDEX idx_trades_symbol_ts ON trades (symbol, trade_ts);
//! ```
//!
//! Prices and volumes are stored as decimal strings so no precision is lost.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use turso::Value;

use crate::application::ports::{StoreError, TradeStore};
use crate::domain::trade::TradeRecord;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    price TEXT NOT NULL,
    volume TEXT NOT NULL,
    trade_ts INTEGER NOT NULL,
    received_ts INTEGER NOT NULL,
    conditions TEXT NOT NULL
)";

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_trades_symbol_ts ON trades (symbol, trade_ts)";

const INSERT: &str = "INSERT INTO trades (symbol, price, volume, trade_ts, received_ts, conditions) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const SELECT_RECENT: &str = "SELECT symbol, price, volume, trade_ts, received_ts, conditions \
     FROM trades WHERE symbol = ?1 ORDER BY trade_ts DESC, id DESC LIMIT ?2";

const SELECT_RANGE: &str = "SELECT symbol, price, volume, trade_ts, received_ts, conditions \
     FROM trades WHERE symbol = ?1 AND trade_ts >= ?2 AND trade_ts <= ?3 \
     ORDER BY trade_ts ASC, id ASC";

/// Trade store backed by an embedded Turso database.
pub struct TursoTradeStore {
    conn: Mutex<turso::Connection>,
}

impl std::fmt::Debug for TursoTradeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TursoTradeStore").finish_non_exhaustive()
    }
}

impl TursoTradeStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let db = turso::Builder::new_local(&path)
            .build()
            .await
            .map_err(unavailable)?;
        let conn = db.connect().map_err(unavailable)?;

        conn.execute(CREATE_TABLE, ()).await.map_err(unavailable)?;
        conn.execute(CREATE_INDEX, ()).await.map_err(unavailable)?;

        tracing::info!(path = %path, "Trade store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn select(&self, sql: &str, params: Vec<Value>) -> Result<Vec<TradeRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query(sql, params).await.map_err(query)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(query)? {
            let values = (0..6)
                .map(|i| row.get_value(i))
                .collect::<Result<Vec<_>, _>>()
                .map_err(query)?;
            records.push(decode_row(&values)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl TradeStore for TursoTradeStore {
    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let params = vec![
            Value::Text(record.symbol.clone()),
            Value::Text(record.price.to_string()),
            Value::Text(record.volume.to_string()),
            Value::Integer(record.trade_time.timestamp_millis()),
            Value::Integer(record.received_at.timestamp_millis()),
            Value::Text(record.conditions.clone()),
        ];
        let conn = self.conn.lock().await;
        conn.execute(INSERT, params)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Write {
                message: e.to_string(),
            })
    }

    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.select(
            SELECT_RECENT,
            vec![Value::Text(symbol.to_string()), Value::Integer(limit)],
        )
        .await
    }

    async fn range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        self.select(
            SELECT_RANGE,
            vec![
                Value::Text(symbol.to_string()),
                Value::Integer(from.timestamp_millis()),
                Value::Integer(to.timestamp_millis()),
            ],
        )
        .await
    }
}

fn unavailable(e: turso::Error) -> StoreError {
    StoreError::Unavailable {
        message: e.to_string(),
    }
}

fn query(e: turso::Error) -> StoreError {
    StoreError::Query {
        message: e.to_string(),
    }
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        message: format!("{column}: {detail}"),
    }
}

fn text(value: &Value, column: &str) -> Result<String, StoreError> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        other => Err(corrupt(column, format!("expected text, got {other:?}"))),
    }
}

fn decimal(value: &Value, column: &str) -> Result<Decimal, StoreError> {
    let raw = text(value, column)?;
    Decimal::from_str(&raw).map_err(|e| corrupt(column, e))
}

fn millis(value: &Value, column: &str) -> Result<DateTime<Utc>, StoreError> {
    match value {
        Value::Integer(ms) => DateTime::from_timestamp_millis(*ms)
            .ok_or_else(|| corrupt(column, format!("timestamp out of range: {ms}"))),
        other => Err(corrupt(column, format!("expected integer, got {other:?}"))),
    }
}

fn decode_row(values: &[Value]) -> Result<TradeRecord, StoreError> {
    let [symbol, price, volume, trade_ts, received_ts, conditions] = values else {
        return Err(corrupt("row", format!("expected 6 columns, got {}", values.len())));
    };
    Ok(TradeRecord {
        symbol: text(symbol, "symbol")?,
        price: decimal(price, "price")?,
        volume: decimal(volume, "volume")?,
        trade_time: millis(trade_ts, "trade_ts")?,
        received_at: millis(received_ts, "received_ts")?,
        conditions: text(conditions, "conditions")?,
    })
}
