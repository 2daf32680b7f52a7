//! Persistence Adapters
//!
//! Storage implementations of the [`TradeStore`](crate::application::ports::TradeStore) port.

pub mod in_memory;
pub mod turso_store;

pub use in_memory::InMemoryTradeStore;
pub use turso_store::TursoTradeStore;
