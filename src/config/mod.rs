//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CacheArgs, CacheCommand, CacheOverride, CachePurgeArgs, CliArgs, Command, ServeArgs,
    ServeOverrides,
};

use std::{net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "shopsans";
const ENV_PREFIX: &str = "SHOPSANS";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_CONNECT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_CACHE_OPERATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_CACHE_RECONNECT_INTERVAL_SECS: u64 = 30;
const DEFAULT_SEARCH_TTL_SECS: u64 = 30;
const DEFAULT_ANALYTICS_TTL_SECS: u64 = 60;
const DEFAULT_SEARCH_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_SEARCH_RATE_LIMIT_MAX_REQUESTS: u64 = 180;
const DEFAULT_ANALYTICS_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_ANALYTICS_RATE_LIMIT_MAX_REQUESTS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub search_rate_limit: RateLimitSettings,
    pub analytics_rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// `redis://...`, `memory://`, or `None` to run without a shared store.
    pub url: Option<String>,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub reconnect_interval: Duration,
    pub search_ttl: Duration,
    pub analytics_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Cache(args)) => match &args.command {
            CacheCommand::Purge(purge) => raw.apply_cache_override(&purge.store),
        },
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    search_rate_limit: RawRateLimitSettings,
    analytics_rate_limit: RawRateLimitSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(timeout) = overrides.cache_operation_timeout_ms {
            self.cache.operation_timeout_ms = Some(timeout);
        }
        if let Some(window) = overrides.search_rate_limit_window_seconds {
            self.search_rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.search_rate_limit_max_requests {
            self.search_rate_limit.max_requests = Some(max);
        }
        if let Some(window) = overrides.analytics_rate_limit_window_seconds {
            self.analytics_rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.analytics_rate_limit_max_requests {
            self.analytics_rate_limit.max_requests = Some(max);
        }

        self.apply_cache_override(&overrides.cache);
    }

    fn apply_cache_override(&mut self, overrides: &CacheOverride) {
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            search_rate_limit,
            analytics_rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            search_rate_limit: build_rate_limit_settings(
                search_rate_limit,
                RateLimitDefaults {
                    window_key: "search_rate_limit.window_seconds",
                    max_key: "search_rate_limit.max_requests",
                    window_seconds: DEFAULT_SEARCH_RATE_LIMIT_WINDOW_SECS,
                    max_requests: DEFAULT_SEARCH_RATE_LIMIT_MAX_REQUESTS,
                },
            )?,
            analytics_rate_limit: build_rate_limit_settings(
                analytics_rate_limit,
                RateLimitDefaults {
                    window_key: "analytics_rate_limit.window_seconds",
                    max_key: "analytics_rate_limit.max_requests",
                    window_seconds: DEFAULT_ANALYTICS_RATE_LIMIT_WINDOW_SECS,
                    max_requests: DEFAULT_ANALYTICS_RATE_LIMIT_MAX_REQUESTS,
                },
            )?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_seconds(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let connect_timeout = positive_millis(
        cache
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CACHE_CONNECT_TIMEOUT_MS),
        "cache.connect_timeout_ms",
    )?;
    let operation_timeout = positive_millis(
        cache
            .operation_timeout_ms
            .unwrap_or(DEFAULT_CACHE_OPERATION_TIMEOUT_MS),
        "cache.operation_timeout_ms",
    )?;
    let reconnect_interval = positive_seconds(
        cache
            .reconnect_interval_seconds
            .unwrap_or(DEFAULT_CACHE_RECONNECT_INTERVAL_SECS),
        "cache.reconnect_interval_seconds",
    )?;
    let search_ttl = positive_seconds(
        cache.search_ttl_seconds.unwrap_or(DEFAULT_SEARCH_TTL_SECS),
        "cache.search_ttl_seconds",
    )?;
    let analytics_ttl = positive_seconds(
        cache
            .analytics_ttl_seconds
            .unwrap_or(DEFAULT_ANALYTICS_TTL_SECS),
        "cache.analytics_ttl_seconds",
    )?;

    Ok(CacheSettings {
        url: non_blank(cache.url),
        connect_timeout,
        operation_timeout,
        reconnect_interval,
        search_ttl,
        analytics_ttl,
    })
}

struct RateLimitDefaults {
    window_key: &'static str,
    max_key: &'static str,
    window_seconds: u64,
    max_requests: u64,
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
    defaults: RateLimitDefaults,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds = non_zero_u32(
        rate_limit
            .window_seconds
            .unwrap_or(defaults.window_seconds),
        defaults.window_key,
    )?;
    let max_requests = non_zero_u32(
        rate_limit.max_requests.unwrap_or(defaults.max_requests),
        defaults.max_key,
    )?;

    Ok(RateLimitSettings {
        window_seconds,
        max_requests,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    operation_timeout_ms: Option<u64>,
    reconnect_interval_seconds: Option<u64>,
    search_ttl_seconds: Option<u64>,
    analytics_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}
