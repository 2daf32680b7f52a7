//! Application Ports (Driver and Driven)
//!
//! Ports define the interfaces the engine uses to reach the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedTransport` / `FeedSession`: streaming sessions to the upstream feed
//! - `TradeStore`: durable trade storage
//! - `SymbolUniverse`: the catalogue of tradable symbols
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedEventHandler`: receives connection and message events
//! - `SessionLifecycle`: session start/stop primitives driven by the scheduler

mod feed_event_port;
mod feed_transport_port;
mod session_port;
mod symbol_universe_port;
mod trade_store_port;

pub use feed_event_port::{FeedEvent, FeedEventHandler};
pub use feed_transport_port::{FeedSession, FeedTransport, SessionEvent, TransportError};
pub use session_port::SessionLifecycle;
pub use symbol_universe_port::{SymbolUniverse, UniverseError};
pub use trade_store_port::{StoreError, TradeStore};

#[cfg(test)]
pub use session_port::MockSessionLifecycle;
#[cfg(test)]
pub use trade_store_port::MockTradeStore;
