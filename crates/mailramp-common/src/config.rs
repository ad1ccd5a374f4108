//! Configuration for MailRamp

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "MAILRAMP_CONFIG";

/// Environment variable holding the provider API key
pub const PROVIDER_API_KEY_ENV: &str = "RESEND_API_KEY";

/// Environment variable holding the database URL
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Email provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Dispatch cycle tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Built-in scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Automatic retry of failed entries
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend (only "postgres" is supported)
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            run_migrations: true,
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Bearer token required by the dispatch trigger (disabled when unset)
    pub trigger_token: Option<String>,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            trigger_token: None,
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Transactional email provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider API base URL
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// API key (falls back to `RESEND_API_KEY`)
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_provider_url() -> String {
    "https://api.resend.com".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

/// Dispatch cycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on entries dispatched in a single cycle
    #[serde(default = "default_max_entries_per_cycle")]
    pub max_entries_per_cycle: usize,

    /// Upper bound on messages in a single provider call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Sender groups dispatched concurrently
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// How far ahead of `scheduled_for` entries are considered for window sends.
    ///
    /// A future entry inside this horizon is sent as soon as the current time
    /// falls in its campaign's daily window, ahead of its batch slot. The
    /// default of one day therefore lets a cycle inside the window drain the
    /// whole day's slots at once, bounded only by the warm-up cap and
    /// `max_entries_per_cycle`. Set to 0 to hold every entry until its slot.
    #[serde(default = "default_lookahead_minutes")]
    pub lookahead_minutes: i64,

    /// Campaign lifetime used when no end date is stored
    #[serde(default = "default_max_campaign_days")]
    pub max_campaign_days: i64,

    /// Slack added after the last scheduled slot when deriving an end date
    #[serde(default = "default_completion_grace_hours")]
    pub completion_grace_hours: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_entries_per_cycle: default_max_entries_per_cycle(),
            max_batch_size: default_max_batch_size(),
            concurrency_limit: default_concurrency_limit(),
            lookahead_minutes: default_lookahead_minutes(),
            max_campaign_days: default_max_campaign_days(),
            completion_grace_hours: default_completion_grace_hours(),
        }
    }
}

fn default_max_entries_per_cycle() -> usize {
    100
}

fn default_max_batch_size() -> usize {
    100
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_lookahead_minutes() -> i64 {
    24 * 60
}

fn default_max_campaign_days() -> i64 {
    30
}

fn default_completion_grace_hours() -> i64 {
    24
}

/// Built-in interval scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the dispatch cycle from inside the server process
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

/// Retry policy for failed queue entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Move failed entries back to pending automatically
    #[serde(default)]
    pub enabled: bool,

    /// Entries that failed this many times stay failed
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Delay before the first retry
    #[serde(default = "default_retry_base_delay")]
    pub base_delay_secs: i64,

    /// Delay ceiling
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_secs: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            base_delay_secs: default_retry_base_delay(),
            max_delay_secs: default_retry_max_delay(),
        }
    }
}

fn default_max_retries() -> i32 {
    3
}

fn default_retry_base_delay() -> i64 {
    5 * 60
}

fn default_retry_max_delay() -> i64 {
    6 * 60 * 60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            provider: ProviderConfig::default(),
            dispatch: DispatchConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment and file
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/mailramp/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Fill secrets that were left out of the file from the environment
    fn apply_env(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var(PROVIDER_API_KEY_ENV).ok();
        }
        if self.database.url.is_none() {
            self.database.url = std::env::var(DATABASE_URL_ENV).ok();
        }
    }

    /// Reject settings the dispatch engine cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.dispatch.max_entries_per_cycle == 0 {
            return Err(crate::Error::Config(
                "dispatch.max_entries_per_cycle must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.max_batch_size == 0 {
            return Err(crate::Error::Config(
                "dispatch.max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.concurrency_limit == 0 {
            return Err(crate::Error::Config(
                "dispatch.concurrency_limit must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(crate::Error::Config(
                "scheduler.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.retry.enabled && self.retry.base_delay_secs <= 0 {
            return Err(crate::Error::Config(
                "retry.base_delay_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
