use clap::{Parser, ValueEnum};
use lib_telemetry::core::QueryConfig;
use lib_telemetry::ingestors::DetectorConfig;
use lib_telemetry::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "server_telemetry.conf";

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DB_POOL_SIZE: usize = 8;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_BACKOFF_MS: u64 = 1000;
const DEFAULT_ACTIVE_WINDOW_SECS: u64 = 300;
const DEFAULT_RECENT_LIMIT: usize = 50;
const DEFAULT_VIEWER_BUFFER: usize = 64;
const DEFAULT_VIEWER_SEND_TIMEOUT_MS: u64 = 2000;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_KEEP: usize = 5;

/// Which store back-end the server reads from.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Telemetry change-detection and live fan-out server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TELEMETRY_PORT", help = "Port to listen on for viewers and pull requests.")]
    pub port: Option<u16>,

    #[clap(long, env = "TELEMETRY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection string.")]
    pub db_url: Option<String>,

    #[clap(long, env = "TELEMETRY_DB_POOL_SIZE", help = "Maximum number of pooled database connections.")]
    pub db_pool_size: Option<usize>,

    #[clap(long, env = "TELEMETRY_STORE", value_enum, help = "Store back-end (postgres or memory).")]
    pub store: Option<StoreKind>,

    #[clap(long, env = "TELEMETRY_POLL_INTERVAL_MS", help = "Milliseconds between two change-detection polls.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_BACKOFF_MS", help = "Milliseconds to wait after a failed poll.")]
    pub backoff_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_ACTIVE_WINDOW_SECS", help = "Seconds within which a producer counts as active.")]
    pub active_window_secs: Option<u64>,

    #[clap(long, env = "TELEMETRY_RECENT_LIMIT", help = "Maximum samples returned by one history request.")]
    pub recent_limit: Option<usize>,

    #[clap(long, env = "TELEMETRY_VIEWER_BUFFER", help = "Undelivered events a viewer may queue before it is dropped.")]
    pub viewer_buffer: Option<usize>,

    #[clap(long, env = "TELEMETRY_VIEWER_SEND_TIMEOUT_MS", help = "Milliseconds allowed for one frame write to a viewer.")]
    pub viewer_send_timeout_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_EVENT_CHANNEL_CAPACITY", help = "Capacity of the detector to broadcaster channel.")]
    pub event_channel_capacity: Option<usize>,

    #[clap(long, env = "TELEMETRY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TELEMETRY_LOG_JSON", help = "Write the file log as JSON lines (true or false).")]
    pub log_json: Option<bool>,

    #[clap(long, env = "TELEMETRY_LOG_KEEP", help = "Number of old log files kept on startup.")]
    pub log_keep: Option<usize>,

    #[clap(long, env = "TELEMETRY_ENSURE_SCHEMA", help = "Create the samples table on startup (true or false).")]
    pub ensure_schema: Option<bool>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            db_url: other.db_url.or(self.db_url),
            db_pool_size: other.db_pool_size.or(self.db_pool_size),
            store: other.store.or(self.store),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            backoff_ms: other.backoff_ms.or(self.backoff_ms),
            active_window_secs: other.active_window_secs.or(self.active_window_secs),
            recent_limit: other.recent_limit.or(self.recent_limit),
            viewer_buffer: other.viewer_buffer.or(self.viewer_buffer),
            viewer_send_timeout_ms: other.viewer_send_timeout_ms.or(self.viewer_send_timeout_ms),
            event_channel_capacity: other.event_channel_capacity.or(self.event_channel_capacity),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_json: other.log_json.or(self.log_json),
            log_keep: other.log_keep.or(self.log_keep),
            ensure_schema: other.ensure_schema.or(self.ensure_schema),
        }
    }

    /// Built-in defaults. `db_url` has none.
    pub fn defaults() -> Config {
        Config {
            port: Some(DEFAULT_PORT),
            db_pool_size: Some(DEFAULT_DB_POOL_SIZE),
            store: Some(StoreKind::default()),
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
            backoff_ms: Some(DEFAULT_BACKOFF_MS),
            active_window_secs: Some(DEFAULT_ACTIVE_WINDOW_SECS),
            recent_limit: Some(DEFAULT_RECENT_LIMIT),
            viewer_buffer: Some(DEFAULT_VIEWER_BUFFER),
            viewer_send_timeout_ms: Some(DEFAULT_VIEWER_SEND_TIMEOUT_MS),
            event_channel_capacity: Some(DEFAULT_EVENT_CHANNEL_CAPACITY),
            log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
            log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
            log_json: Some(false),
            log_keep: Some(DEFAULT_LOG_KEEP),
            ensure_schema: Some(true),
            ..Default::default()
        }
    }

    /// Layers defaults, then the JSON config file (if present), then `cli`
    /// (which already carries the environment).
    pub fn layered(cli: Config) -> Result<Config> {
        let config_file_path = cli
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut current_config = Config::defaults();

        if config_file_path.exists() {
            let config_str = fs::read_to_string(&config_file_path).map_err(|e| {
                TelemetryError::Config(format!("cannot read {}: {}", config_file_path.display(), e))
            })?;
            let file_config = serde_json::from_str::<Config>(&config_str).map_err(|e| {
                TelemetryError::Config(format!("cannot parse {}: {}", config_file_path.display(), e))
            })?;
            current_config = current_config.merge(file_config);
        }

        Ok(current_config.merge(cli))
    }

    /// Turns the layered options into typed, validated settings.
    pub fn resolve(self) -> Result<Settings> {
        let settings = Settings {
            port: self.port.unwrap_or(DEFAULT_PORT),
            db_url: self.db_url,
            db_pool_size: self.db_pool_size.unwrap_or(DEFAULT_DB_POOL_SIZE),
            store: self.store.unwrap_or_default(),
            detector: DetectorConfig {
                poll_interval: Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS)),
                backoff: Duration::from_millis(self.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS)),
            },
            query: QueryConfig {
                active_window: Duration::from_secs(self.active_window_secs.unwrap_or(DEFAULT_ACTIVE_WINDOW_SECS)),
                recent_limit: self.recent_limit.unwrap_or(DEFAULT_RECENT_LIMIT),
            },
            viewer_buffer: self.viewer_buffer.unwrap_or(DEFAULT_VIEWER_BUFFER),
            viewer_send_timeout: Duration::from_millis(
                self.viewer_send_timeout_ms.unwrap_or(DEFAULT_VIEWER_SEND_TIMEOUT_MS),
            ),
            event_channel_capacity: self.event_channel_capacity.unwrap_or(DEFAULT_EVENT_CHANNEL_CAPACITY),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_level: self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_json: self.log_json.unwrap_or(false),
            log_keep: self.log_keep.unwrap_or(DEFAULT_LOG_KEEP),
            ensure_schema: self.ensure_schema.unwrap_or(true),
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Reads the command line and environment, then layers them over the config
/// file and the defaults.
pub fn load_config() -> Result<Config> {
    Config::layered(Config::parse())
}

/// Fully-populated runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    pub db_url: Option<String>,
    pub db_pool_size: usize,
    pub store: StoreKind,
    pub detector: DetectorConfig,
    pub query: QueryConfig,
    pub viewer_buffer: usize,
    pub viewer_send_timeout: Duration,
    pub event_channel_capacity: usize,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_json: bool,
    pub log_keep: usize,
    pub ensure_schema: bool,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("poll_interval_ms", self.detector.poll_interval.is_zero()),
            ("backoff_ms", self.detector.backoff.is_zero()),
            ("active_window_secs", self.query.active_window.is_zero()),
            ("recent_limit", self.query.recent_limit == 0),
            ("viewer_buffer", self.viewer_buffer == 0),
            ("viewer_send_timeout_ms", self.viewer_send_timeout.is_zero()),
            ("event_channel_capacity", self.event_channel_capacity == 0),
            ("db_pool_size", self.db_pool_size == 0),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, zero)| *zero) {
            return Err(TelemetryError::Config(format!("{} must be greater than zero", name)));
        }
        if self.store == StoreKind::Postgres && self.db_url.as_deref().map_or(true, str::is_empty) {
            return Err(TelemetryError::Config(
                "the postgres store needs a database URL (DATABASE_URL or --db-url)".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_telemetry"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_resolve_for_the_memory_store() {
        let mut config = Config::defaults();
        config.store = Some(StoreKind::Memory);
        let settings = config.resolve().unwrap();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.detector.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.detector.backoff, Duration::from_secs(1));
        assert_eq!(settings.query.active_window, Duration::from_secs(300));
        assert_eq!(settings.query.recent_limit, 50);
        assert!(settings.ensure_schema);
        assert!(!settings.log_json);
    }

    #[test]
    fn postgres_without_url_is_rejected() {
        let err = Config::defaults().resolve().unwrap_err();
        assert!(matches!(err, TelemetryError::Config(_)));

        let mut config = Config::defaults();
        config.db_url = Some("postgres://localhost/telemetry".to_string());
        assert!(config.resolve().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = Config::defaults();
        config.store = Some(StoreKind::Memory);
        config.poll_interval_ms = Some(0);
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_telemetry.conf");
        fs::write(
            &path,
            r#"{"port": 6000, "pollIntervalMs": 250, "store": "memory", "logLevel": "debug"}"#,
        )
        .unwrap();

        let path_arg = path.to_string_lossy().to_string();
        let config = Config::layered(cli(&["--config-path", &path_arg, "--port", "7000"])).unwrap();
        let settings = config.resolve().unwrap();
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.detector.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.store, StoreKind::Memory);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.viewer_buffer, 64);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "{ port: ").unwrap();
        let path_arg = path.to_string_lossy().to_string();
        let err = Config::layered(cli(&["--config-path", &path_arg])).unwrap_err();
        assert!(matches!(err, TelemetryError::Config(_)));
    }

    #[test]
    fn store_and_booleans_parse_from_the_command_line() {
        let config = cli(&["--store", "memory", "--log-json", "true", "--ensure-schema", "false"]);
        assert_eq!(config.store, Some(StoreKind::Memory));
        assert_eq!(config.log_json, Some(true));
        assert_eq!(config.ensure_schema, Some(false));
    }
}
