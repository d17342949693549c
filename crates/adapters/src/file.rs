//! File-backed attribute store
//!
//! Serves mostly-static vehicle attributes (VIN, board model, subjects) from a
//! JSON document. The document is either a flat `{path: value}` object or
//! `{path: {"value": v, "public": b, "readOnly": b}}`; both forms may be mixed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use vis_core::SignalValue;
use vis_ports::{AdapterBinding, AdapterError, AdapterResult, ChangeBatch, PathSet, SignalMap};

use crate::base::{BaseAdapter, SignalSpec};
use crate::factory::AdapterSpec;

fn default_read_only() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAdapterConfig {
    /// JSON document holding the attributes
    pub file: PathBuf,
    /// Prefix joined in front of every key in the document
    #[serde(default)]
    pub vss_path: Option<String>,
    /// Default public flag for entries that don't set one
    #[serde(default)]
    pub public: bool,
    /// Default read-only flag for entries that don't set one
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    /// Rewrite the document after every successful client write
    #[serde(default)]
    pub persist: bool,
}

pub struct FileAdapter {
    base: BaseAdapter,
    config: FileAdapterConfig,
    /// Full signal path → key in the document
    keys: Vec<(String, String)>,
    /// Serialises document rewrites
    persist_lock: tokio::sync::Mutex<()>,
}

impl FileAdapter {
    pub fn new(name: impl Into<String>, config: FileAdapterConfig) -> AdapterResult<Self> {
        let name = name.into();
        let content = std::fs::read_to_string(&config.file).map_err(|e| {
            AdapterError::InvalidConfig(format!("{}: {}: {}", name, config.file.display(), e))
        })?;
        let document: Map<String, Value> = serde_json::from_str(&content).map_err(|e| {
            AdapterError::InvalidConfig(format!("{}: {}: {}", name, config.file.display(), e))
        })?;

        let mut base = BaseAdapter::new(name.clone());
        let mut keys = Vec::with_capacity(document.len());
        for (key, entry) in document {
            let path = match &config.vss_path {
                Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, key),
                _ => key.clone(),
            };
            let spec = parse_entry(&config, entry)
                .map_err(|e| AdapterError::InvalidConfig(format!("{}: {}: {}", name, key, e)))?;
            base = base.with_signal(path.clone(), spec);
            keys.push((path, key));
        }

        tracing::debug!(adapter = %name, signals = keys.len(), "loaded attribute file");

        Ok(FileAdapter {
            base,
            config,
            keys,
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn from_spec(spec: &AdapterSpec) -> AdapterResult<Arc<dyn AdapterBinding>> {
        let config: FileAdapterConfig = spec.parse_config()?;
        Ok(Arc::new(FileAdapter::new(spec.name.clone(), config)?))
    }

    pub fn file(&self) -> &Path {
        &self.config.file
    }

    async fn persist(&self) -> AdapterResult<()> {
        let _guard = self.persist_lock.lock().await;
        let specs = self.base.specs().await;

        let mut document = Map::new();
        for (path, key) in &self.keys {
            if let Some(spec) = specs.get(path) {
                document.insert(
                    key.clone(),
                    json!({
                        "value": Value::from(spec.value.clone()),
                        "public": spec.public,
                        "readOnly": spec.read_only,
                    }),
                );
            }
        }

        let content = serde_json::to_string_pretty(&Value::Object(document))
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?;
        tokio::fs::write(&self.config.file, content)
            .await
            .map_err(|e| {
                AdapterError::Unavailable(format!("{}: {}", self.config.file.display(), e))
            })
    }
}

fn parse_entry(config: &FileAdapterConfig, entry: Value) -> Result<SignalSpec, String> {
    match entry {
        Value::Object(mut fields) => {
            let value = fields.remove("value").unwrap_or(Value::Null);
            let public = fields
                .get("public")
                .and_then(Value::as_bool)
                .unwrap_or(config.public);
            let read_only = fields
                .get("readOnly")
                .and_then(Value::as_bool)
                .unwrap_or(config.read_only);
            let value = SignalValue::try_from(value).map_err(|e| e.to_string())?;
            Ok(SignalSpec::new(value).public(public).read_only(read_only))
        }
        other => {
            let value = SignalValue::try_from(other).map_err(|e| e.to_string())?;
            Ok(SignalSpec::new(value)
                .public(config.public)
                .read_only(config.read_only))
        }
    }
}

#[async_trait]
impl AdapterBinding for FileAdapter {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn path_list(&self) -> PathSet {
        self.base.path_list().await
    }

    async fn is_public(&self, path: &str) -> AdapterResult<bool> {
        self.base.is_public(path).await
    }

    async fn is_read_only(&self, path: &str) -> AdapterResult<bool> {
        self.base.is_read_only(path).await
    }

    async fn get(&self, paths: &PathSet) -> AdapterResult<SignalMap> {
        self.base.get(paths).await
    }

    /// The in-memory write is committed and published before the document is
    /// rewritten, so a failed rewrite is logged and the write still succeeds.
    async fn set(&self, values: SignalMap) -> AdapterResult<u64> {
        let seq = self.base.set(values).await?;
        if self.config.persist {
            if let Err(e) = self.persist().await {
                tracing::warn!(adapter = %self.name(), seq, "failed to persist attributes: {}", e);
            }
        }
        Ok(seq)
    }

    async fn subscribe(&self, paths: &PathSet) -> AdapterResult<()> {
        self.base.subscribe(paths).await
    }

    async fn unsubscribe(&self, paths: &PathSet) -> AdapterResult<()> {
        self.base.unsubscribe(paths).await
    }

    async fn unsubscribe_all(&self) {
        self.base.unsubscribe_all().await
    }

    fn change_stream(&self) -> Option<mpsc::Receiver<ChangeBatch>> {
        self.base.change_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_doc(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn config(file: &Path) -> FileAdapterConfig {
        FileAdapterConfig {
            file: file.to_path_buf(),
            vss_path: Some("Attribute.Vehicle".into()),
            public: false,
            read_only: true,
            persist: false,
        }
    }

    fn paths(items: &[&str]) -> PathSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_loads_flat_and_detailed_entries() {
        let doc = write_doc(
            r#"{
                "VIN": {"value": "1HGCM82633A004352", "public": true},
                "BoardModel": "rpi4",
                "Subjects": {"value": ["alice", "bob"], "readOnly": false}
            }"#,
        );
        let adapter = FileAdapter::new("attrs", config(doc.path())).unwrap();

        assert_eq!(adapter.path_list().await.len(), 3);
        assert!(adapter.is_public("Attribute.Vehicle.VIN").await.unwrap());
        assert!(!adapter.is_public("Attribute.Vehicle.BoardModel").await.unwrap());
        assert!(adapter.is_read_only("Attribute.Vehicle.BoardModel").await.unwrap());
        assert!(!adapter.is_read_only("Attribute.Vehicle.Subjects").await.unwrap());

        let values = adapter
            .get(&paths(&["Attribute.Vehicle.Subjects"]))
            .await
            .unwrap();
        assert_eq!(
            values["Attribute.Vehicle.Subjects"],
            SignalValue::List(vec!["alice".into(), "bob".into()])
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let result = FileAdapter::new("attrs", config(Path::new("/nonexistent/vis.json")));
        assert!(matches!(result, Err(AdapterError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_object_values_are_rejected() {
        let doc = write_doc(r#"{"Nested": {"value": {"a": 1}}}"#);
        let result = FileAdapter::new("attrs", config(doc.path()));
        assert!(matches!(result, Err(AdapterError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_persist_rewrites_document() {
        let doc = write_doc(r#"{"Subjects": {"value": ["alice"], "readOnly": false}}"#);
        let mut cfg = config(doc.path());
        cfg.persist = true;
        let adapter = FileAdapter::new("attrs", cfg.clone()).unwrap();

        let mut update = SignalMap::new();
        update.insert(
            "Attribute.Vehicle.Subjects".into(),
            SignalValue::List(vec!["carol".into()]),
        );
        adapter.set(update).await.unwrap();

        let reloaded = FileAdapter::new("attrs", cfg).unwrap();
        let values = reloaded
            .get(&paths(&["Attribute.Vehicle.Subjects"]))
            .await
            .unwrap();
        assert_eq!(
            values["Attribute.Vehicle.Subjects"],
            SignalValue::List(vec!["carol".into()])
        );
        assert!(!reloaded.is_read_only("Attribute.Vehicle.Subjects").await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_write() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("attrs.json");
        std::fs::write(&file, r#"{"Model": {"value": "A", "readOnly": false}}"#).unwrap();
        let mut cfg = config(&file);
        cfg.persist = true;
        let adapter = FileAdapter::new("attrs", cfg).unwrap();
        let mut rx = adapter.change_stream().unwrap();
        adapter.subscribe(&adapter.path_list().await).await.unwrap();

        // The document can no longer be written.
        std::fs::remove_file(&file).unwrap();
        std::fs::create_dir(&file).unwrap();

        let mut update = SignalMap::new();
        update.insert("Attribute.Vehicle.Model".into(), "B".into());
        let seq = adapter.set(update).await.unwrap();

        let values = adapter
            .get(&paths(&["Attribute.Vehicle.Model"]))
            .await
            .unwrap();
        assert_eq!(values["Attribute.Vehicle.Model"], SignalValue::from("B"));

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.seq, seq);
        assert_eq!(batch.values["Attribute.Vehicle.Model"], SignalValue::from("B"));
    }

    #[tokio::test]
    async fn test_from_spec() {
        let doc = write_doc(r#"{"VIN": "1HGCM82633A004352"}"#);
        let spec = AdapterSpec {
            kind: "file".into(),
            name: "vin".into(),
            config: json!({ "file": doc.path(), "vssPath": "Attribute.Vehicle", "public": true }),
        };
        let adapter = FileAdapter::from_spec(&spec).unwrap();
        assert_eq!(adapter.name(), "vin");
        assert!(adapter.is_public("Attribute.Vehicle.VIN").await.unwrap());
    }
}
