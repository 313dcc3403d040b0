//! Pipeline Configuration Settings
//!
//! Configuration types for the tick pipeline, loaded from environment
//! variables. Malformed numeric values fall back to their defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::{BackoffConfig, ExecutionStrategy};
use crate::domain::pagination::DEFAULT_PAGE_LIMIT;

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// Process-local store; contents are lost on exit.
    Memory,
}

impl StoreBackend {
    /// Parse backend from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Self::Memory,
            _ => Self::Sqlite,
        }
    }

    /// Backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

/// Finnhub API token.
#[derive(Clone)]
pub struct FinnhubCredentials {
    token: String,
}

impl FinnhubCredentials {
    /// Create credentials.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self { token }
    }

    /// Get the API token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for FinnhubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinnhubCredentials")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Consumer pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Name of the stream messages are consumed from.
    pub stream_name: String,
    /// Number of queue partitions (one consumer each).
    pub partitions: u32,
    /// Write strategy.
    pub strategy: ExecutionStrategy,
    /// Deadline for each store call.
    pub store_timeout: Duration,
    /// Initial delay before redelivering a failed message.
    pub retry_delay_initial: Duration,
    /// Maximum delay before redelivering a failed message.
    pub retry_delay_max: Duration,
    /// Bounded capacity of each partition.
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stream_name: "market-trades".to_string(),
            partitions: 1,
            strategy: ExecutionStrategy::Independent,
            store_timeout: Duration::from_secs(10),
            retry_delay_initial: Duration::from_millis(500),
            retry_delay_max: Duration::from_secs(30),
            queue_capacity: 10_000,
        }
    }
}

impl PipelineSettings {
    /// Backoff applied between redeliveries of one message.
    #[must_use]
    pub fn retry_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.retry_delay_initial,
            max_delay: self.retry_delay_max,
            ..BackoffConfig::default()
        }
    }
}

/// Store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Backend selection.
    pub backend: StoreBackend,
    /// SQLite database path.
    pub database_path: PathBuf,
    /// Delay between attempts to open the store at startup.
    pub connect_retry_delay: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_path: PathBuf::from("trades.db"),
            connect_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Feed WebSocket settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Whether the feed client runs.
    pub enabled: bool,
    /// WebSocket base URL.
    pub url: String,
    /// Symbols to subscribe to.
    pub symbols: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://ws.finnhub.io".to_string(),
            symbols: Vec::new(),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl FeedSettings {
    /// Backoff applied between reconnection attempts.
    #[must_use]
    pub fn reconnect_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            max_attempts: self.max_reconnect_attempts,
            ..BackoffConfig::default()
        }
    }
}

/// Read API settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// HTTP port.
    pub port: u16,
    /// Deadline for each read request.
    pub request_timeout: Duration,
    /// Page size used when a request omits one.
    pub default_limit: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            request_timeout: Duration::from_secs(10),
            default_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Consumer pipeline settings.
    pub pipeline: PipelineSettings,
    /// Store settings.
    pub store: StoreSettings,
    /// Feed settings.
    pub feed: FeedSettings,
    /// Feed credentials; present whenever the feed is enabled.
    pub credentials: Option<FinnhubCredentials>,
    /// Read API settings.
    pub api: ApiSettings,
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed is enabled and `FINNHUB_TOKEN` is
    /// missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let pipeline_defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            stream_name: std::env::var("PIPELINE_STREAM_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(pipeline_defaults.stream_name),
            partitions: parse_env_u32("PIPELINE_PARTITIONS", pipeline_defaults.partitions).max(1),
            strategy: parse_strategy(std::env::var("PIPELINE_STRATEGY").ok().as_deref()),
            store_timeout: parse_env_duration_secs(
                "PIPELINE_STORE_TIMEOUT_SECS",
                pipeline_defaults.store_timeout,
            ),
            retry_delay_initial: parse_env_duration_millis(
                "PIPELINE_RETRY_DELAY_INITIAL_MS",
                pipeline_defaults.retry_delay_initial,
            ),
            retry_delay_max: parse_env_duration_secs(
                "PIPELINE_RETRY_DELAY_MAX_SECS",
                pipeline_defaults.retry_delay_max,
            ),
            queue_capacity: parse_env_usize(
                "PIPELINE_QUEUE_CAPACITY",
                pipeline_defaults.queue_capacity,
            )
            .max(1),
        };

        let store_defaults = StoreSettings::default();
        let store = StoreSettings {
            backend: std::env::var("STORE_BACKEND")
                .map(|s| StoreBackend::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            database_path: std::env::var("STORE_DATABASE_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map_or(store_defaults.database_path, PathBuf::from),
            connect_retry_delay: parse_env_duration_secs(
                "STORE_CONNECT_RETRY_SECS",
                store_defaults.connect_retry_delay,
            ),
        };

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            enabled: parse_env_bool("FEED_ENABLED", feed_defaults.enabled),
            url: std::env::var("FINNHUB_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(feed_defaults.url),
            symbols: std::env::var("FINNHUB_SYMBOLS")
                .map(|s| parse_symbols(&s))
                .unwrap_or_default(),
            reconnect_delay_initial: parse_env_duration_millis(
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
        };

        let credentials = if feed.enabled {
            let token = std::env::var("FINNHUB_TOKEN")
                .map_err(|_| ConfigError::MissingEnvVar("FINNHUB_TOKEN".to_string()))?;
            if token.trim().is_empty() {
                return Err(ConfigError::EmptyValue("FINNHUB_TOKEN".to_string()));
            }
            Some(FinnhubCredentials::new(token))
        } else {
            None
        };

        let api_defaults = ApiSettings::default();
        let api = ApiSettings {
            port: parse_env_u16("API_PORT", api_defaults.port),
            request_timeout: parse_env_duration_secs(
                "API_REQUEST_TIMEOUT_SECS",
                api_defaults.request_timeout,
            ),
            default_limit: parse_env_usize("API_DEFAULT_LIMIT", api_defaults.default_limit).max(1),
        };

        Ok(Self {
            pipeline,
            store,
            feed,
            credentials,
            api,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Unset selects the default quietly; an unrecognized name is logged before
/// falling back to it.
fn parse_strategy(raw: Option<&str>) -> ExecutionStrategy {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return ExecutionStrategy::default();
    };
    ExecutionStrategy::parse(raw).unwrap_or_else(|| {
        let fallback = ExecutionStrategy::default();
        tracing::warn!(
            value = raw,
            fallback = fallback.as_str(),
            "Unrecognized PIPELINE_STRATEGY, expected independent or atomic"
        );
        fallback
    })
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().map_or(default, |v| {
        match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        }
    })
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parsing() {
        assert_eq!(
            StoreBackend::from_str_case_insensitive("MEMORY"),
            StoreBackend::Memory
        );
        assert_eq!(
            StoreBackend::from_str_case_insensitive("sqlite"),
            StoreBackend::Sqlite
        );
        assert_eq!(
            StoreBackend::from_str_case_insensitive("unknown"),
            StoreBackend::Sqlite
        );
    }

    #[test]
    fn strategy_names_and_typos() {
        assert_eq!(parse_strategy(None), ExecutionStrategy::Independent);
        assert_eq!(parse_strategy(Some("  ")), ExecutionStrategy::Independent);
        assert_eq!(parse_strategy(Some("ATOMIC")), ExecutionStrategy::Atomic);
        assert_eq!(parse_strategy(Some("independent")), ExecutionStrategy::Independent);
        assert_eq!(parse_strategy(Some("atomc")), ExecutionStrategy::Independent);
        assert_eq!(ExecutionStrategy::parse("atomc"), None);
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = FinnhubCredentials::new("tok_abc123".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("tok_abc123"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(creds.token(), "tok_abc123");
    }

    #[test]
    fn symbols_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            parse_symbols(" AAPL, MSFT,,BINANCE:BTCUSDT ,"),
            vec!["AAPL", "MSFT", "BINANCE:BTCUSDT"]
        );
        assert!(parse_symbols("").is_empty());
    }

    #[test]
    fn pipeline_settings_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.stream_name, "market-trades");
        assert_eq!(settings.partitions, 1);
        assert_eq!(settings.strategy, ExecutionStrategy::Independent);
        assert_eq!(settings.store_timeout, Duration::from_secs(10));
        assert_eq!(settings.queue_capacity, 10_000);

        let retry = settings.retry_backoff();
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
        assert_eq!(retry.max_attempts, 0);
    }

    #[test]
    fn feed_and_api_defaults() {
        let feed = FeedSettings::default();
        assert!(feed.enabled);
        assert_eq!(feed.url, "wss://ws.finnhub.io");
        assert!((feed.reconnect_backoff().multiplier - 2.0).abs() < f64::EPSILON);

        let api = ApiSettings::default();
        assert_eq!(api.port, 8080);
        assert_eq!(api.request_timeout, Duration::from_secs(10));
        assert_eq!(api.default_limit, 50);
    }
}
