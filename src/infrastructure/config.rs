//! # Application configuration
//!
//! One immutable [`AppConfig`] is built at start-up from a config file plus
//! `ENERGY_CRAWLER__*` environment overrides, validated, and then handed to
//! every component that needs it. Nothing reads configuration globally.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment prefix for overrides, e.g. `ENERGY_CRAWLER__SCHEDULER__INTERVAL_SECONDS=600`.
pub const ENV_PREFIX: &str = "ENERGY_CRAWLER";

pub mod defaults {
    pub const DATABASE_URL: &str = "sqlite://data/energy_prices.db";
    pub const MAX_CONNECTIONS: u32 = 16;
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;

    pub const MIN_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 3_000;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

    pub const JSON_LOG_DIR: &str = "json_logs";
    pub const SAVE_JSON_DB: bool = false;
    pub const SAVE_JSON_FILE: bool = true;
    pub const TRANSFORM_ON_FETCH: bool = true;

    pub const SCHEDULER_INTERVAL_SECONDS: u64 = 3_600;
    pub const TICK_MILLIS: u64 = 1_000;
    pub const INITIAL_WORKERS: usize = 1;

    pub const BIND_ADDRESS: &str = "127.0.0.1:8765";

    pub const CSV_SEPARATOR: &str = ";";
    pub const PROVINCE_COLUMN: &str = "province";
    pub const CITY_COLUMN: &str = "city";
    pub const POSTAL_COLUMN: &str = "postal_code";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "energy-crawler.log";
    pub const MAX_LOG_FILES: u32 = 10;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config from file: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub countries: Vec<CountryConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::DATABASE_URL.to_string(),
            max_connections: defaults::MAX_CONNECTIONS,
            busy_timeout_ms: defaults::BUSY_TIMEOUT_MS,
        }
    }
}

/// Politeness delay, request headers, proxy and timeout for endpoint fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_seconds: u64,
    pub headers: BTreeMap<String, String>,
    pub proxy: ProxyConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("user-agent".to_string(), defaults::USER_AGENT.to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        Self {
            min_delay_ms: defaults::MIN_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            headers,
            proxy: ProxyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Initial values of the runtime persistence toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub json_log_dir: PathBuf,
    pub save_json_db: bool,
    pub save_json_file: bool,
    pub transform_on_fetch: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            json_log_dir: PathBuf::from(defaults::JSON_LOG_DIR),
            save_json_db: defaults::SAVE_JSON_DB,
            save_json_file: defaults::SAVE_JSON_FILE,
            transform_on_fetch: defaults::TRANSFORM_ON_FETCH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
    pub tick_millis: u64,
    pub initial_workers: usize,
    pub paused: bool,
    pub verbose_log: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: defaults::SCHEDULER_INTERVAL_SECONDS,
            tick_millis: defaults::TICK_MILLIS,
            initial_workers: defaults::INITIAL_WORKERS,
            paused: false,
            verbose_log: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bind_address: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { bind_address: defaults::BIND_ADDRESS.to_string() }
    }
}

/// Payload sections to read and the price-component alias table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub sections: Vec<String>,
    pub components: Vec<ComponentAliases>,
}

/// Canonical component name and the raw `type` strings that map to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentAliases {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl TransformConfig {
    /// Lower-cased raw type → canonical component name.
    #[must_use]
    pub fn alias_table(&self) -> HashMap<String, String> {
        self.components
            .iter()
            .flat_map(|c| c.aliases.iter().map(move |a| (a.trim().to_lowercase(), c.name.clone())))
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for component in &self.components {
            if component.name.trim().is_empty() {
                return Err(ConfigError::invalid("component name cannot be empty"));
            }
            for alias in &component.aliases {
                let key = alias.trim().to_lowercase();
                if let Some(previous) = seen.insert(key, &component.name) {
                    if previous != component.name {
                        return Err(ConfigError::invalid(format!(
                            "alias '{alias}' maps to both '{previous}' and '{}'",
                            component.name
                        )));
                    }
                }
            }
        }
        if self.sections.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid("section names cannot be empty"));
        }
        Ok(())
    }
}

/// One crawled country: endpoint, geography source and VAT/currency metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub csv_path: Option<PathBuf>,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub vat: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub columns: CsvColumns,
}

fn default_separator() -> String {
    defaults::CSV_SEPARATOR.to_string()
}

impl CountryConfig {
    #[must_use]
    pub fn new(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            csv_path: None,
            separator: default_separator(),
            vat: 0.0,
            currency: String::new(),
            columns: CsvColumns::default(),
        }
    }

    #[must_use]
    pub fn separator_byte(&self) -> u8 {
        self.separator.as_bytes().first().copied().unwrap_or(b';')
    }
}

/// Header names of the geography CSV columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvColumns {
    pub province: String,
    pub city: String,
    pub postal: String,
    pub label: Option<String>,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            province: defaults::PROVINCE_COLUMN.to_string(),
            city: defaults::CITY_COLUMN.to_string(),
            postal: defaults::POSTAL_COLUMN.to_string(),
            label: None,
        }
    }
}

/// Logging system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// Enable JSON formatted logs
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Directory for log files; next to the executable when unset
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,
    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,
    /// Keep only the most recent log file (delete all others)
    pub keep_only_latest: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::MAX_LOG_FILES,
            auto_cleanup_logs: true,
            keep_only_latest: false,
        }
    }
}

impl AppConfig {
    /// Load from `path` (extension optional) layered with environment overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.min_delay_ms > self.fetch.max_delay_ms {
            return Err(ConfigError::invalid("min_delay_ms cannot be greater than max_delay_ms"));
        }
        if self.fetch.request_timeout_seconds == 0 {
            return Err(ConfigError::invalid("request_timeout_seconds must be greater than 0"));
        }
        if self.fetch.proxy.enabled && self.fetch.proxy.url.is_none() {
            return Err(ConfigError::invalid("proxy is enabled but no proxy url is set"));
        }
        if self.scheduler.interval_seconds == 0 {
            return Err(ConfigError::invalid("interval_seconds must be greater than 0"));
        }
        if self.scheduler.tick_millis == 0 {
            return Err(ConfigError::invalid("tick_millis must be greater than 0"));
        }
        let required = u32::try_from(self.scheduler.initial_workers + 2).unwrap_or(u32::MAX);
        if self.database.max_connections < required {
            return Err(ConfigError::invalid(format!(
                "max_connections ({}) must be at least initial_workers + 2 ({required})",
                self.database.max_connections
            )));
        }

        let mut names = HashSet::new();
        for country in &self.countries {
            if country.name.trim().is_empty() || country.base_url.trim().is_empty() {
                return Err(ConfigError::invalid("countries need a name and a base_url"));
            }
            if !names.insert(country.name.trim().to_lowercase()) {
                return Err(ConfigError::invalid(format!("duplicate country '{}'", country.name)));
            }
            if country.separator.len() != 1 {
                return Err(ConfigError::invalid(format!(
                    "separator for '{}' must be a single byte",
                    country.name
                )));
            }
        }

        self.transform.validate()
    }

    #[must_use]
    pub fn country(&self, name: &str) -> Option<&CountryConfig> {
        let wanted = name.trim().to_lowercase();
        self.countries.iter().find(|c| c.name.trim().to_lowercase() == wanted)
    }
}
