//! Adapter construction from configuration
//!
//! Adapters are selected by type name at startup. Each type maps to a
//! constructor that receives the adapter's own opaque JSON config.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use vis_ports::{AdapterBinding, AdapterError, AdapterResult};

use crate::file::FileAdapter;
use crate::http::HttpPollAdapter;
use crate::simulator::SimulatorAdapter;

/// One configured adapter instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSpec {
    /// Adapter type, e.g. `file`, `http`, `simulator`
    #[serde(rename = "type")]
    pub kind: String,
    /// Instance name, unique per configuration
    pub name: String,
    /// Adapter-specific settings
    #[serde(default)]
    pub config: serde_json::Value,
}

impl AdapterSpec {
    /// Typed settings; a missing `config` reads as `{}`
    pub fn parse_config<T: DeserializeOwned>(&self) -> AdapterResult<T> {
        let config = match &self.config {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(config)
            .map_err(|e| AdapterError::InvalidConfig(format!("{}: {}", self.name, e)))
    }
}

pub type AdapterConstructor = fn(&AdapterSpec) -> AdapterResult<Arc<dyn AdapterBinding>>;

/// Type name → constructor table
#[derive(Clone, Default)]
pub struct AdapterFactory {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that knows the adapters shipped in this crate
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.register("file", FileAdapter::from_spec);
        factory.register("http", HttpPollAdapter::from_spec);
        factory.register("simulator", SimulatorAdapter::from_spec);
        factory
    }

    pub fn register(&mut self, kind: impl Into<String>, constructor: AdapterConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build(&self, spec: &AdapterSpec) -> AdapterResult<Arc<dyn AdapterBinding>> {
        let constructor = self.constructors.get(&spec.kind).ok_or_else(|| {
            AdapterError::InvalidConfig(format!(
                "{}: unknown adapter type '{}'",
                spec.name, spec.kind
            ))
        })?;
        constructor(spec)
    }
}
