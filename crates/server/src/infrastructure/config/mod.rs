//! Configuration loading for the broker
//!
//! One JSON document describes:
//! - Server binding and the websocket endpoint
//! - Where session permissions come from (static token table or HTTP service)
//! - The adapters to register, in order

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use vis_adapters::{AdapterFactory, AdapterSpec};
use vis_core::AccessLevel;

/// Built-in configuration used when no file is given
const DEFAULT_CONFIG: &str = include_str!("../../../config/default.json");

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisConfig {
    /// Service name, used in logs
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub permissions: PermissionConfig,

    /// Adapters to register, in order
    #[serde(default)]
    pub adapters: Vec<AdapterSpec>,
}

fn default_name() -> String {
    "Vehicle Information Service".to_string()
}

impl Default for VisConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            server: ServerConfig::default(),
            permissions: PermissionConfig::default(),
            adapters: Vec::new(),
        }
    }
}

impl VisConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The configuration shipped with the binary: a simulated vehicle
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json(DEFAULT_CONFIG)
    }

    /// Check what serde can't: ranges, unique names, known adapter types
    pub fn validate(&self, factory: &AdapterFactory) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServer("port must not be 0".into()));
        }
        if self.server.outbound_capacity == 0 {
            return Err(ConfigError::InvalidServer(
                "outboundCapacity must be positive".into(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::InvalidServer(format!(
                "path must start with '/': {}",
                self.server.path
            )));
        }

        if let PermissionConfig::Http { url, timeout_ms } = &self.permissions {
            if url.is_empty() {
                return Err(ConfigError::InvalidPermissions("url is empty".into()));
            }
            if *timeout_ms == 0 {
                return Err(ConfigError::InvalidPermissions(
                    "timeoutMs must be positive".into(),
                ));
            }
        }

        let mut names = HashSet::new();
        for spec in &self.adapters {
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::InvalidAdapter(format!(
                    "duplicate adapter name: {}",
                    spec.name
                )));
            }
            if !factory.contains(&spec.kind) {
                return Err(ConfigError::InvalidAdapter(format!(
                    "{}: unknown type '{}' (known: {})",
                    spec.name,
                    spec.kind,
                    factory.kinds().join(", ")
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Websocket endpoint
    #[serde(default = "default_path")]
    pub path: String,
    /// Frames queued per connection before notifications are dropped
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_path() -> String {
    "/".to_string()
}

fn default_outbound_capacity() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Where session permissions come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum PermissionConfig {
    /// Fixed token → grant table
    Static {
        #[serde(default = "default_ttl")]
        ttl: u64,
        #[serde(default)]
        tokens: BTreeMap<String, BTreeMap<String, AccessLevel>>,
    },
    /// Remote permission service
    Http {
        url: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_ttl() -> u64 {
    3600
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for PermissionConfig {
    fn default() -> Self {
        PermissionConfig::Static {
            ttl: default_ttl(),
            tokens: BTreeMap::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io { path: String, error: String },
    Parse(String),
    InvalidServer(String),
    InvalidPermissions(String),
    InvalidAdapter(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, error } => {
                write!(f, "Failed to read config file '{}': {}", path, error)
            }
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::InvalidServer(e) => write!(f, "Invalid server config: {}", e),
            ConfigError::InvalidPermissions(e) => write!(f, "Invalid permission config: {}", e),
            ConfigError::InvalidAdapter(e) => write!(f, "Invalid adapter config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
