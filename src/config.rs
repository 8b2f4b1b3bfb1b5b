use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

pub const MAINNET_ENDPOINT: &str = "https://ethereum-rpc.publicnode.com";
pub const TESTNET_ENDPOINT: &str = "https://cloudflare-eth.com";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub scanner: ScannerConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// JSON-RPC node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Mainnet JSON-RPC endpoint URL
    pub endpoint: String,
    /// Endpoint used when `use_testnet` is set
    pub testnet_endpoint: String,
    pub use_testnet: bool,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Block treated as already scanned; 0 starts at the chain tip
    pub initial_block: u64,
    /// Interval between scan passes in seconds
    pub scan_interval_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Subscription store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database file path, used by the sqlite backend only
    pub path: String,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: MAINNET_ENDPOINT.to_string(),
            testnet_endpoint: TESTNET_ENDPOINT.to_string(),
            use_testnet: false,
            timeout_seconds: 30,
        }
    }
}

impl RpcConfig {
    /// The endpoint actually dialed, honoring the testnet switch
    pub fn active_endpoint(&self) -> &str {
        if self.use_testnet {
            &self.testnet_endpoint
        } else {
            &self.endpoint
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            initial_block: 0,
            scan_interval_seconds: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "./subscriptions.db".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ApiConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply a listen address of the form `host:port` or `:port`
    pub fn set_listen_address(&mut self, addr: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: "addr".to_string(),
            value: addr.to_string(),
        };

        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        self.port = port.parse().map_err(|_| invalid())?;
        if !host.is_empty() {
            self.host = host.to_string();
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables.
    /// Environment variables take precedence over file values.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the TOML file named by `CONFIG_FILE`
    pub fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a TOML file; a missing file yields defaults
    pub fn load_from_path(config_path: &str) -> Result<Self, ConfigError> {
        if !Path::new(config_path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .map_err(|_| ConfigError::FileNotFound(config_path.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(endpoint) = env::var("ETH_RPC_URL") {
            self.rpc.endpoint = endpoint;
        }
        if let Some(use_testnet) = parse_env("ETH_USE_TESTNET")? {
            self.rpc.use_testnet = use_testnet;
        }
        if let Some(timeout) = parse_env("RPC_TIMEOUT_SECONDS")? {
            self.rpc.timeout_seconds = timeout;
        }

        if let Some(initial_block) = parse_env("INITIAL_BLOCK")? {
            self.scanner.initial_block = initial_block;
        }
        if let Some(interval) = parse_env("SCAN_INTERVAL_SECONDS")? {
            self.scanner.scan_interval_seconds = interval;
        }

        if let Ok(backend) = env::var("STORAGE_BACKEND") {
            self.storage.backend = match backend.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "sqlite" => StorageBackend::Sqlite,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "STORAGE_BACKEND".to_string(),
                        value: backend,
                    })
                }
            };
        }
        if let Ok(path) = env::var("STORAGE_PATH") {
            self.storage.path = path;
        }

        if let Ok(host) = env::var("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.api.port = port;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        for endpoint in [&self.rpc.endpoint, &self.rpc.testnet_endpoint] {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::InvalidUrl(endpoint.clone()));
            }
        }

        if self.rpc.timeout_seconds == 0 || self.rpc.timeout_seconds > 300 {
            return Err(ConfigError::InvalidValue {
                key: "rpc.timeout_seconds".to_string(),
                value: self.rpc.timeout_seconds.to_string(),
            });
        }

        if self.scanner.scan_interval_seconds == 0 || self.scanner.scan_interval_seconds > 3600 {
            return Err(ConfigError::InvalidValue {
                key: "scanner.scan_interval_seconds".to_string(),
                value: self.scanner.scan_interval_seconds.to_string(),
            });
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.path".to_string(),
                value: self.storage.path.clone(),
            });
        }

        if self.api.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.port".to_string(),
                value: self.api.port.to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                value: self.logging.level.clone(),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                value: self.logging.format.clone(),
            });
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::Parsing(e.to_string()))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
