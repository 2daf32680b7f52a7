//! Engine Configuration Settings
//!
//! Configuration types for the feed engine, loaded from environment variables.
//! Numeric settings fall back to their defaults when unset or unparsable;
//! values that would make the engine misbehave (time zone, session hours,
//! zero capacities) are rejected.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, TimeDelta, Timelike};
use chrono_tz::Tz;

use crate::application::ports::SymbolUniverse;
use crate::application::services::ReconnectConfig;
use crate::domain::connection::{Credential, CredentialPool};
use crate::domain::feed::SubscribePacing;
use crate::domain::schedule::MarketCalendar;
use crate::infrastructure::feed::HeartbeatConfig;
use crate::infrastructure::universe::{FileSymbolUniverse, StaticSymbolUniverse, parse_symbols};

/// Upper bound on numbered `FEED_API_TOKEN_n` variables scanned.
const MAX_NUMBERED_TOKENS: usize = 64;

/// Reconnect delay strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Doubling delay with jitter, capped at the maximum.
    Exponential,
}

impl BackoffStrategy {
    /// Parse strategy from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "exponential" | "backoff" => Self::Exponential,
            _ => Self::Fixed,
        }
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket endpoint; the credential is appended as `token`.
    pub url: String,
    /// Delay between consecutive handshakes.
    pub connect_stagger: Duration,
    /// Pause after connecting before the subscription pass.
    pub settle_delay: Duration,
    /// Symbols per connection.
    pub shard_capacity: usize,
    /// Subscribe messages per batch.
    pub subscribe_batch: usize,
    /// Pause after each full batch.
    pub subscribe_pause: Duration,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence tolerated after a ping.
    pub heartbeat_timeout: Duration,
    /// Capacity of each connection's event channel.
    pub event_buffer: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "wss://ws.finnhub.io".to_string(),
            connect_stagger: Duration::from_secs(2),
            settle_delay: Duration::from_secs(3),
            shard_capacity: 50,
            subscribe_batch: 10,
            subscribe_pause: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(30),
            event_buffer: 1024,
        }
    }
}

impl FeedSettings {
    /// Subscribe pacing.
    #[must_use]
    pub const fn pacing(&self) -> SubscribePacing {
        SubscribePacing {
            batch_size: self.subscribe_batch,
            pause: self.subscribe_pause,
        }
    }

    /// Heartbeat configuration.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig::new(self.heartbeat_interval, self.heartbeat_timeout)
    }
}

/// Reconnection settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Delay strategy.
    pub strategy: BackoffStrategy,
    /// Fixed delay, or the initial delay for exponential backoff.
    pub delay: Duration,
    /// Cap for exponential backoff.
    pub max_delay: Duration,
    /// Maximum attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: 0, // Unlimited
        }
    }
}

impl ReconnectSettings {
    /// Build the restart policy configuration.
    #[must_use]
    pub fn policy(&self) -> ReconnectConfig {
        let config = match self.strategy {
            BackoffStrategy::Fixed => ReconnectConfig::fixed(self.delay),
            BackoffStrategy::Exponential => {
                ReconnectConfig::exponential(self.delay, self.max_delay.max(self.delay))
            }
        };
        config.with_max_attempts(self.max_attempts)
    }
}

/// Trade persistence settings.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    /// Minimum spacing between writes for one symbol.
    pub save_interval: Duration,
    /// Database file; `:memory:` keeps everything in RAM.
    pub db_path: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            save_interval: Duration::from_secs(10),
            db_path: "trades.db".to_string(),
        }
    }
}

/// Market schedule settings.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    /// Exchange time zone.
    pub timezone: Tz,
    /// Local session open.
    pub open: NaiveTime,
    /// Local session close.
    pub close: NaiveTime,
    /// Preparation window before the open.
    pub pre_open: Duration,
    /// Schedule evaluation period.
    pub poll_interval: Duration,
    /// Health check period.
    pub health_interval: Duration,
    /// Non-trading dates in exchange local time.
    pub holidays: BTreeSet<NaiveDate>,
    /// Whether the scheduler drives the engine at startup.
    pub enabled: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            pre_open: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(60),
            health_interval: Duration::from_secs(10),
            holidays: BTreeSet::new(),
            enabled: true,
        }
    }
}

impl ScheduleSettings {
    /// Build the trading calendar.
    #[must_use]
    pub fn calendar(&self) -> MarketCalendar {
        MarketCalendar::new(
            self.timezone,
            self.open,
            self.close,
            TimeDelta::from_std(self.pre_open).unwrap_or(TimeDelta::zero()),
            self.holidays.clone(),
        )
    }
}

/// Where the symbol universe comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolSource {
    /// Fixed list.
    List(Vec<String>),
    /// Newline-separated file, re-read every cycle.
    File(PathBuf),
}

impl Default for SymbolSource {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl SymbolSource {
    /// Build the universe adapter.
    #[must_use]
    pub fn universe(&self) -> Arc<dyn SymbolUniverse> {
        match self {
            Self::List(symbols) => Arc::new(StaticSymbolUniverse::new(symbols.clone())),
            Self::File(path) => Arc::new(FileSymbolUniverse::new(path.clone())),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Upstream credentials in pool order.
    pub credentials: CredentialPool,
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Persistence settings.
    pub persistence: PersistenceSettings,
    /// Schedule settings.
    pub schedule: ScheduleSettings,
    /// Symbol universe source.
    pub symbols: SymbolSource,
    /// Server port settings.
    pub server: ServerSettings,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value that cannot safely fall back to a default
    /// is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the time zone, session hours or a capacity is
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let credentials = parse_credentials(&env);
        if credentials.valid_count() == 0 {
            tracing::error!(
                configured = credentials.len(),
                "No valid feed credentials configured; engine will stay idle"
            );
        }

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            url: env.get("FEED_WS_URL").unwrap_or(feed_defaults.url),
            connect_stagger: env.millis("FEED_CONNECT_STAGGER_MS", feed_defaults.connect_stagger),
            settle_delay: env.millis("FEED_SETTLE_DELAY_MS", feed_defaults.settle_delay),
            shard_capacity: env.nonzero("FEED_SHARD_CAPACITY", feed_defaults.shard_capacity)?,
            subscribe_batch: env.nonzero("FEED_SUBSCRIBE_BATCH", feed_defaults.subscribe_batch)?,
            subscribe_pause: env.millis("FEED_SUBSCRIBE_PAUSE_MS", feed_defaults.subscribe_pause),
            heartbeat_interval: env.secs(
                "FEED_HEARTBEAT_INTERVAL_SECS",
                feed_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "FEED_HEARTBEAT_TIMEOUT_SECS",
                feed_defaults.heartbeat_timeout,
            ),
            event_buffer: env.parse("FEED_EVENT_BUFFER", feed_defaults.event_buffer),
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            strategy: env
                .get("FEED_RECONNECT_STRATEGY")
                .map(|s| BackoffStrategy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            delay: env.millis("FEED_RECONNECT_DELAY_MS", reconnect_defaults.delay),
            max_delay: env.millis("FEED_RECONNECT_DELAY_MAX_MS", reconnect_defaults.max_delay),
            max_attempts: env.parse("FEED_MAX_RECONNECT_ATTEMPTS", reconnect_defaults.max_attempts),
        };

        let persistence_defaults = PersistenceSettings::default();
        let persistence = PersistenceSettings {
            save_interval: env.millis("TRADE_SAVE_INTERVAL_MS", persistence_defaults.save_interval),
            db_path: env.get("TRADE_DB_PATH").unwrap_or(persistence_defaults.db_path),
        };

        let schedule = parse_schedule(&env)?;

        let symbols = match env.get("FEED_SYMBOLS_FILE") {
            Some(path) => SymbolSource::File(PathBuf::from(path)),
            None => SymbolSource::List(
                env.get("FEED_SYMBOLS")
                    .map(|list| parse_symbols(list.split(',')))
                    .unwrap_or_default(),
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("FEED_ENGINE_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            credentials,
            feed,
            reconnect,
            persistence,
            schedule,
            symbols,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        message: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Typed accessors over a key lookup.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| {
            matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    fn nonzero(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::invalid(key, "must be greater than zero")),
            n => Ok(n),
        }
    }

    fn nonzero_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.secs(key, default);
        if secs.is_zero() {
            return Err(ConfigError::invalid(key, "must be greater than zero"));
        }
        Ok(secs)
    }

    fn time(&self, key: &str, default: NaiveTime) -> Result<NaiveTime, ConfigError> {
        self.get(key).map_or(Ok(default), |v| {
            NaiveTime::parse_from_str(&v, "%H:%M")
                .map_err(|e| ConfigError::invalid(key, format!("expected HH:MM ({e})")))
        })
    }
}

/// `FEED_API_TOKENS` (comma-separated) wins over numbered `FEED_API_TOKEN_n`.
/// Blank entries keep their position so connection ids stay stable.
fn parse_credentials<F>(env: &Env<'_, F>) -> CredentialPool
where
    F: Fn(&str) -> Option<String>,
{
    let raw: Vec<String> = match env.get("FEED_API_TOKENS") {
        Some(list) => list.split(',').map(ToString::to_string).collect(),
        None => {
            let mut tokens: Vec<String> = (1..=MAX_NUMBERED_TOKENS)
                .map(|n| (env.0)(&format!("FEED_API_TOKEN_{n}")).unwrap_or_default())
                .collect();
            while tokens.last().is_some_and(|t| t.trim().is_empty()) {
                tokens.pop();
            }
            tokens
        }
    };

    let pool = CredentialPool::new(raw.into_iter().map(Credential::new).collect());
    let blank = pool.len() - pool.valid_count();
    if blank > 0 {
        tracing::warn!(blank, "Skipping blank feed credentials");
    }
    pool
}

fn parse_schedule<F>(env: &Env<'_, F>) -> Result<ScheduleSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ScheduleSettings::default();

    let timezone = match env.get("MARKET_TIMEZONE") {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|e| ConfigError::invalid("MARKET_TIMEZONE", e.to_string()))?,
        None => defaults.timezone,
    };
    let open = env.time("MARKET_OPEN", defaults.open)?;
    let close = env.time("MARKET_CLOSE", defaults.close)?;
    if open >= close {
        return Err(ConfigError::invalid(
            "MARKET_CLOSE",
            format!("close {close} must be after open {open}"),
        ));
    }

    // Preparation starts on the same calendar day as the open.
    let pre_open_mins = env.parse::<u64>("MARKET_PRE_OPEN_MINS", 30);
    let pre_open = Duration::from_secs(pre_open_mins.saturating_mul(60));
    if pre_open.as_secs() >= u64::from(open.num_seconds_from_midnight()) {
        return Err(ConfigError::invalid(
            "MARKET_PRE_OPEN_MINS",
            format!("{pre_open_mins} minutes reaches back past midnight before open {open}"),
        ));
    }

    let mut holidays = BTreeSet::new();
    for entry in env.get("MARKET_HOLIDAYS").unwrap_or_default().split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match NaiveDate::parse_from_str(entry, "%Y-%m-%d") {
            Ok(date) => {
                holidays.insert(date);
            }
            Err(e) => tracing::warn!(entry, error = %e, "Ignoring unparsable market holiday"),
        }
    }

    Ok(ScheduleSettings {
        timezone,
        open,
        close,
        pre_open,
        poll_interval: env.nonzero_secs("SCHEDULE_POLL_SECS", defaults.poll_interval)?,
        health_interval: env.nonzero_secs("HEALTH_CHECK_INTERVAL_SECS", defaults.health_interval)?,
        holidays,
        enabled: env.flag("SCHEDULER_ENABLED", defaults.enabled),
    })
}
