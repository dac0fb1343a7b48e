use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::cache::CacheKey;

/// Command-line arguments for the Shopsans binary.
#[derive(Debug, Parser)]
#[command(
    name = "shopsans",
    version,
    about = "Shopsans admin API with shared response cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SHOPSANS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Shared cache store maintenance.
    Cache(CacheArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverride {
    /// Override the shared cache store URL (`redis://...` or `memory://`).
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the per-operation shared store timeout.
    #[arg(long = "cache-operation-timeout-ms", value_name = "MILLIS")]
    pub cache_operation_timeout_ms: Option<u64>,

    #[arg(long = "search-rate-limit-window-seconds", value_name = "SECONDS")]
    pub search_rate_limit_window_seconds: Option<u64>,

    #[arg(long = "search-rate-limit-max-requests", value_name = "COUNT")]
    pub search_rate_limit_max_requests: Option<u64>,

    #[arg(long = "analytics-rate-limit-window-seconds", value_name = "SECONDS")]
    pub analytics_rate_limit_window_seconds: Option<u64>,

    #[arg(long = "analytics-rate-limit-max-requests", value_name = "COUNT")]
    pub analytics_rate_limit_max_requests: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheCommand {
    /// Delete every cached entry whose key starts with a prefix.
    Purge(CachePurgeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CachePurgeArgs {
    #[command(flatten)]
    pub store: CacheOverride,

    /// Raw key prefix, e.g. `search:type=products`.
    #[arg(
        long,
        value_name = "PREFIX",
        conflicts_with = "namespace",
        required_unless_present = "namespace"
    )]
    pub prefix: Option<String>,

    /// Purge a whole key namespace, e.g. `search` or `overview`.
    #[arg(long, value_name = "NAMESPACE")]
    pub namespace: Option<String>,
}

impl CachePurgeArgs {
    /// The store key prefix to purge, or `None` when the selection is blank.
    pub fn key_prefix(&self) -> Option<String> {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        match non_blank(&self.namespace) {
            Some(namespace) => Some(CacheKey::namespace_prefix(&namespace)),
            None => non_blank(&self.prefix),
        }
    }
}
