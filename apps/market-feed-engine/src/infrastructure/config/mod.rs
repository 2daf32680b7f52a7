//! Configuration Module
//!
//! Configuration loading for the feed engine.

mod settings;

pub use settings::{
    BackoffStrategy, ConfigError, EngineConfig, FeedSettings, PersistenceSettings,
    ReconnectSettings, ScheduleSettings, ServerSettings, SymbolSource,
};
