//! Upstream Wire Types
//!
//! JSON shapes exchanged with the trade feed.
//!
//! # Inbound
//!
//! ```json
//! {"type":"trade","data":[{"s":"AAPL","p":187.42,"v":100,"c":["1"],"t":1705330800000}]}
//! {"type":"ping"}
//! {"type":"error","msg":"Subscribing to too many symbols"}
//! ```
//!
//! Trade entries also accept long field names (`symbol`, `price`, `volume`,
//! `conditions`, `timestamp`).
//!
//! # Outbound
//!
//! ```json
//! {"type":"subscribe","symbol":"AAPL"}
//! {"type":"unsubscribe","symbol":"AAPL"}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::feed::SubscriptionCommand;
use crate::domain::trade::TradeTick;

// =============================================================================
// Inbound
// =============================================================================

/// One trade inside a `trade` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeEntry {
    /// Ticker symbol.
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: String,

    /// Trade price.
    #[serde(rename = "p", alias = "price")]
    pub price: Decimal,

    /// Trade size.
    #[serde(rename = "v", alias = "volume")]
    pub volume: Decimal,

    /// Condition codes; absent or null means none.
    #[serde(
        rename = "c",
        alias = "conditions",
        default,
        deserialize_with = "conditions"
    )]
    pub conditions: Vec<String>,

    /// Trade time in epoch milliseconds.
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp_ms: i64,
}

impl From<TradeEntry> for TradeTick {
    fn from(entry: TradeEntry) -> Self {
        Self {
            symbol: entry.symbol,
            price: entry.price,
            volume: entry.volume,
            conditions: entry.conditions,
            timestamp_ms: entry.timestamp_ms,
        }
    }
}

/// Condition codes arrive as strings or bare numbers depending on venue.
fn conditions<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

/// Body of an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorFrame {
    /// Error text.
    #[serde(default)]
    pub msg: String,
}

// =============================================================================
// Outbound
// =============================================================================

/// A subscribe or unsubscribe control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame<'a> {
    /// `subscribe` or `unsubscribe`.
    #[serde(rename = "type")]
    pub action: &'static str,
    /// Target symbol.
    pub symbol: &'a str,
}

impl<'a> From<&'a SubscriptionCommand> for ControlFrame<'a> {
    fn from(command: &'a SubscriptionCommand) -> Self {
        Self {
            action: command.action.as_str(),
            symbol: &command.symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_decode() {
        let entry: TradeEntry =
            serde_json::from_str(r#"{"s":"AAPL","p":187.42,"v":100,"c":["1","12"],"t":1705330800000}"#)
                .unwrap();
        assert_eq!(entry.symbol, "AAPL");
        assert_eq!(entry.price, Decimal::new(18742, 2));
        assert_eq!(entry.volume, Decimal::from(100));
        assert_eq!(entry.conditions, vec!["1".to_string(), "12".to_string()]);
        assert_eq!(entry.timestamp_ms, 1_705_330_800_000);
    }

    #[test]
    fn long_keys_decode() {
        let entry: TradeEntry = serde_json::from_str(
            r#"{"symbol":"MSFT","price":400.5,"volume":3,"conditions":null,"timestamp":1}"#,
        )
        .unwrap();
        assert_eq!(entry.symbol, "MSFT");
        assert_eq!(entry.price, Decimal::new(4005, 1));
        assert!(entry.conditions.is_empty());
    }

    #[test]
    fn missing_and_numeric_conditions() {
        let absent: TradeEntry =
            serde_json::from_str(r#"{"s":"X","p":1,"v":1,"t":1}"#).unwrap();
        assert!(absent.conditions.is_empty());

        let numeric: TradeEntry =
            serde_json::from_str(r#"{"s":"X","p":1,"v":1,"c":[1,24],"t":1}"#).unwrap();
        assert_eq!(numeric.conditions, vec!["1".to_string(), "24".to_string()]);
    }

    #[test]
    fn control_frame_wire_shape() {
        let command = SubscriptionCommand::unsubscribe("BINANCE:BTCUSDT");
        let json = serde_json::to_string(&ControlFrame::from(&command)).unwrap();
        assert_eq!(json, r#"{"type":"unsubscribe","symbol":"BINANCE:BTCUSDT"}"#);
    }
}
