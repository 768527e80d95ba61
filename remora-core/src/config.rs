//! Client configuration
//!
//! Loaded from defaults, from `REMORA_*` environment variables, or from a
//! TOML document. Every value has a development-friendly default.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::identity::KEY_SEPARATOR;

/// Default name of the naming RPC service.
pub const DEFAULT_SERVICE_NAME: &str = "NamingRpcService";

/// Default namespace prefix for persisted cache keys.
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "remora-config-";

/// Largest accepted LMDB map size (1 TiB).
pub const MAX_STORE_SIZE_MB: usize = 1024 * 1024;

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoraConfig {
    /// Name of the service resolved through the messaging proxy.
    pub service_name: String,

    /// Namespace prefix for every persisted cache key.
    pub cache_key_prefix: String,

    /// Directory of the LMDB persistent tier. `None` keeps the persistent
    /// tier in process memory.
    pub store_path: Option<PathBuf>,

    /// Maximum size of the LMDB map in megabytes.
    pub store_max_size_mb: usize,

    /// Reply window for RPC calls. `None` leaves timeouts to the transport.
    pub rpc_timeout: Option<Duration>,

    /// Buffer size of the push update channel.
    pub push_channel_capacity: usize,
}

impl Default for RemoraConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            cache_key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            store_path: None,
            store_max_size_mb: 16,
            rpc_timeout: None,
            push_channel_capacity: 256,
        }
    }
}

/// On-disk shape; durations are in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    service_name: Option<String>,
    cache_key_prefix: Option<String>,
    store_path: Option<PathBuf>,
    store_max_size_mb: Option<usize>,
    rpc_timeout_ms: Option<u64>,
    push_channel_capacity: Option<usize>,
}

impl RemoraConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_cache_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = prefix.into();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_store_max_size_mb(mut self, mb: usize) -> Self {
        self.store_max_size_mb = mb;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn with_push_channel_capacity(mut self, capacity: usize) -> Self {
        self.push_channel_capacity = capacity;
        self
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `REMORA_SERVICE_NAME`: naming service name (default: NamingRpcService)
    /// - `REMORA_CACHE_KEY_PREFIX`: persisted key prefix (default: remora-config-)
    /// - `REMORA_STORE_PATH`: LMDB directory (default: unset, memory only)
    /// - `REMORA_STORE_MAX_SIZE_MB`: LMDB map size (default: 16)
    /// - `REMORA_RPC_TIMEOUT_MS`: RPC reply window (default: unset)
    /// - `REMORA_PUSH_CHANNEL_CAPACITY`: push buffer (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`RemoraConfig::from_env`], reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("REMORA_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(prefix) = lookup("REMORA_CACHE_KEY_PREFIX") {
            config.cache_key_prefix = prefix;
        }
        if let Some(path) = lookup("REMORA_STORE_PATH").filter(|p| !p.trim().is_empty()) {
            config.store_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("REMORA_STORE_MAX_SIZE_MB") {
            config.store_max_size_mb = parse_number("REMORA_STORE_MAX_SIZE_MB", &raw)?;
        }
        if let Some(raw) = lookup("REMORA_RPC_TIMEOUT_MS") {
            let ms: u64 = parse_number("REMORA_RPC_TIMEOUT_MS", &raw)?;
            config.rpc_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("REMORA_PUSH_CHANNEL_CAPACITY") {
            config.push_channel_capacity = parse_number("REMORA_PUSH_CHANNEL_CAPACITY", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let defaults = Self::default();

        let config = Self {
            service_name: file.service_name.unwrap_or(defaults.service_name),
            cache_key_prefix: file.cache_key_prefix.unwrap_or(defaults.cache_key_prefix),
            store_path: file.store_path.or(defaults.store_path),
            store_max_size_mb: file.store_max_size_mb.unwrap_or(defaults.store_max_size_mb),
            rpc_timeout: file
                .rpc_timeout_ms
                .map(Duration::from_millis)
                .or(defaults.rpc_timeout),
            push_channel_capacity: file
                .push_channel_capacity
                .unwrap_or(defaults.push_channel_capacity),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail later and far from the cause.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "service_name".to_string(),
            });
        }
        if self.cache_key_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cache_key_prefix".to_string(),
            });
        }
        if !self.cache_key_prefix.ends_with(KEY_SEPARATOR) {
            return Err(ConfigError::InvalidValue {
                field: "cache_key_prefix".to_string(),
                value: self.cache_key_prefix.clone(),
                reason: format!("must end with '{KEY_SEPARATOR}'"),
            });
        }
        if self.store_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store_max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.rpc_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "rpc_timeout".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.store_max_size_mb > MAX_STORE_SIZE_MB {
            return Err(ConfigError::InvalidValue {
                field: "store_max_size_mb".to_string(),
                value: self.store_max_size_mb.to_string(),
                reason: format!("must be at most {MAX_STORE_SIZE_MB}"),
            });
        }
        if self.push_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "push_channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}
