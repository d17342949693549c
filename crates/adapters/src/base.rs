//! Shared in-memory backing store
//!
//! Most adapters are a value source bolted onto this store: they declare their
//! paths once, then write whatever they read from the outside world through
//! [`BaseAdapter::update`]. Client writes come in through the
//! [`AdapterBinding::set`] port and honour the read-only flag.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};
use vis_core::SignalValue;
use vis_ports::{AdapterBinding, AdapterError, AdapterResult, ChangeBatch, PathSet, SignalMap};

/// Capacity of the change stream. A full stream blocks the writer.
pub const DEFAULT_CHANGE_CAPACITY: usize = 100;

/// Static description of one signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    pub value: SignalValue,
    pub public: bool,
    pub read_only: bool,
}

impl SignalSpec {
    pub fn new(value: impl Into<SignalValue>) -> Self {
        Self {
            value: value.into(),
            public: false,
            read_only: false,
        }
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

#[derive(Debug, Clone)]
struct StoredSignal {
    spec: SignalSpec,
    subscribed: bool,
}

#[derive(Debug, Default)]
struct Store {
    signals: HashMap<String, StoredSignal>,
    seq: u64,
}

/// Generic adapter backed by a mutex-guarded map
pub struct BaseAdapter {
    name: String,
    store: Mutex<Store>,
    change_tx: mpsc::Sender<ChangeBatch>,
    change_rx: parking_lot::Mutex<Option<mpsc::Receiver<ChangeBatch>>>,
}

impl BaseAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CHANGE_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (change_tx, change_rx) = mpsc::channel(capacity.max(1));
        BaseAdapter {
            name: name.into(),
            store: Mutex::new(Store::default()),
            change_tx,
            change_rx: parking_lot::Mutex::new(Some(change_rx)),
        }
    }

    /// Declare a signal while the adapter is still being built
    pub fn with_signal(mut self, path: impl Into<String>, spec: SignalSpec) -> Self {
        self.store.get_mut().signals.insert(
            path.into(),
            StoredSignal {
                spec,
                subscribed: false,
            },
        );
        self
    }

    /// Adapter-originated write (a poll result, a simulation tick).
    ///
    /// Unlike a client `set` this ignores the read-only flag.
    pub async fn update(&self, values: SignalMap) -> AdapterResult<u64> {
        self.write(values, false).await
    }

    /// Current value of every signal
    pub async fn snapshot(&self) -> SignalMap {
        let store = self.store.lock().await;
        store
            .signals
            .iter()
            .map(|(path, s)| (path.clone(), s.spec.value.clone()))
            .collect()
    }

    /// Public/read-only flags and value of every signal
    pub async fn specs(&self) -> HashMap<String, SignalSpec> {
        let store = self.store.lock().await;
        store
            .signals
            .iter()
            .map(|(path, s)| (path.clone(), s.spec.clone()))
            .collect()
    }

    async fn write(&self, values: SignalMap, enforce_read_only: bool) -> AdapterResult<u64> {
        let mut store = self.store.lock().await;

        for path in values.keys() {
            match store.signals.get(path) {
                None => return Err(AdapterError::PathNotFound(path.clone())),
                Some(s) if enforce_read_only && s.spec.read_only => {
                    return Err(AdapterError::ReadOnly(path.clone()));
                }
                Some(_) => {}
            }
        }

        let mut changed = false;
        let mut pushed = SignalMap::new();
        for (path, value) in values {
            let Some(signal) = store.signals.get_mut(&path) else {
                continue;
            };
            if signal.spec.value == value {
                continue;
            }
            signal.spec.value = value.clone();
            changed = true;
            if signal.subscribed {
                pushed.insert(path, value);
            }
        }

        if !changed {
            return Ok(store.seq);
        }
        store.seq += 1;
        let seq = store.seq;

        if !pushed.is_empty() {
            // Sent under the store lock so batches enter the stream in seq order.
            let batch = ChangeBatch {
                seq,
                values: pushed,
            };
            if self.change_tx.send(batch).await.is_err() {
                tracing::debug!(adapter = %self.name, "change stream closed, dropping batch");
            }
        }

        Ok(seq)
    }

    async fn set_subscribed(&self, paths: &PathSet, subscribed: bool) -> AdapterResult<()> {
        let mut store = self.store.lock().await;
        if let Some(missing) = paths.iter().find(|p| !store.signals.contains_key(*p)) {
            return Err(AdapterError::PathNotFound(missing.clone()));
        }
        for path in paths {
            if let Some(signal) = store.signals.get_mut(path) {
                signal.subscribed = subscribed;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AdapterBinding for BaseAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn path_list(&self) -> PathSet {
        self.store.lock().await.signals.keys().cloned().collect()
    }

    async fn is_public(&self, path: &str) -> AdapterResult<bool> {
        self.store
            .lock()
            .await
            .signals
            .get(path)
            .map(|s| s.spec.public)
            .ok_or_else(|| AdapterError::PathNotFound(path.to_string()))
    }

    async fn is_read_only(&self, path: &str) -> AdapterResult<bool> {
        self.store
            .lock()
            .await
            .signals
            .get(path)
            .map(|s| s.spec.read_only)
            .ok_or_else(|| AdapterError::PathNotFound(path.to_string()))
    }

    async fn get(&self, paths: &PathSet) -> AdapterResult<SignalMap> {
        let store = self.store.lock().await;
        paths
            .iter()
            .map(|path| {
                store
                    .signals
                    .get(path)
                    .map(|s| (path.clone(), s.spec.value.clone()))
                    .ok_or_else(|| AdapterError::PathNotFound(path.clone()))
            })
            .collect()
    }

    async fn set(&self, values: SignalMap) -> AdapterResult<u64> {
        self.write(values, true).await
    }

    async fn subscribe(&self, paths: &PathSet) -> AdapterResult<()> {
        self.set_subscribed(paths, true).await
    }

    async fn unsubscribe(&self, paths: &PathSet) -> AdapterResult<()> {
        self.set_subscribed(paths, false).await
    }

    async fn unsubscribe_all(&self) {
        let mut store = self.store.lock().await;
        for signal in store.signals.values_mut() {
            signal.subscribed = false;
        }
    }

    fn change_stream(&self) -> Option<mpsc::Receiver<ChangeBatch>> {
        self.change_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trunk() -> BaseAdapter {
        BaseAdapter::new("trunk")
            .with_signal("Signal.Body.Trunk.IsLocked", SignalSpec::new(false))
            .with_signal("Signal.Body.Trunk.IsOpen", SignalSpec::new(true))
            .with_signal(
                "Attribute.Body.BodyType",
                SignalSpec::new("hatchback").public(true).read_only(true),
            )
    }

    fn paths(items: &[&str]) -> PathSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn values(items: &[(&str, SignalValue)]) -> SignalMap {
        items
            .iter()
            .map(|(p, v)| (p.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_metadata() {
        let adapter = trunk();
        assert_eq!(adapter.name(), "trunk");
        assert_eq!(adapter.path_list().await.len(), 3);
        assert!(adapter.is_public("Attribute.Body.BodyType").await.unwrap());
        assert!(adapter.is_read_only("Attribute.Body.BodyType").await.unwrap());
        assert!(!adapter.is_public("Signal.Body.Trunk.IsOpen").await.unwrap());
        assert_eq!(
            adapter.is_public("Signal.Nope").await,
            Err(AdapterError::PathNotFound("Signal.Nope".into()))
        );
    }

    #[tokio::test]
    async fn test_get_fails_on_any_unknown_path() {
        let adapter = trunk();
        let result = adapter
            .get(&paths(&["Signal.Body.Trunk.IsOpen", "Signal.Nope"]))
            .await;
        assert_eq!(result, Err(AdapterError::PathNotFound("Signal.Nope".into())));

        let ok = adapter.get(&paths(&["Signal.Body.Trunk.IsOpen"])).await.unwrap();
        assert_eq!(ok["Signal.Body.Trunk.IsOpen"], SignalValue::Bool(true));
    }

    #[tokio::test]
    async fn test_set_rejects_read_only_without_writing() {
        let adapter = trunk();
        let result = adapter
            .set(values(&[
                ("Signal.Body.Trunk.IsLocked", SignalValue::Bool(true)),
                ("Attribute.Body.BodyType", SignalValue::from("sedan")),
            ]))
            .await;
        assert_eq!(
            result,
            Err(AdapterError::ReadOnly("Attribute.Body.BodyType".into()))
        );

        let snapshot = adapter.snapshot().await;
        assert_eq!(snapshot["Signal.Body.Trunk.IsLocked"], SignalValue::Bool(false));
    }

    #[tokio::test]
    async fn test_update_ignores_read_only() {
        let adapter = trunk();
        adapter
            .update(values(&[("Attribute.Body.BodyType", SignalValue::from("sedan"))]))
            .await
            .unwrap();
        assert_eq!(
            adapter.snapshot().await["Attribute.Body.BodyType"],
            SignalValue::from("sedan")
        );
    }

    #[tokio::test]
    async fn test_only_subscribed_changes_are_pushed() {
        let adapter = trunk();
        let mut rx = adapter.change_stream().unwrap();
        assert!(adapter.change_stream().is_none());

        adapter
            .subscribe(&paths(&["Signal.Body.Trunk.IsLocked"]))
            .await
            .unwrap();

        let seq = adapter
            .set(values(&[
                ("Signal.Body.Trunk.IsLocked", SignalValue::Bool(true)),
                ("Signal.Body.Trunk.IsOpen", SignalValue::Bool(false)),
            ]))
            .await
            .unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.seq, seq);
        assert_eq!(
            batch.values,
            values(&[("Signal.Body.Trunk.IsLocked", SignalValue::Bool(true))])
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unchanged_value_is_not_pushed_and_keeps_seq() {
        let adapter = trunk();
        let mut rx = adapter.change_stream().unwrap();
        adapter.subscribe(&adapter.path_list().await).await.unwrap();

        let first = adapter
            .set(values(&[("Signal.Body.Trunk.IsOpen", SignalValue::Bool(false))]))
            .await
            .unwrap();
        let second = adapter
            .set(values(&[("Signal.Body.Trunk.IsOpen", SignalValue::Bool(false))]))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_silences_stream() {
        let adapter = trunk();
        let mut rx = adapter.change_stream().unwrap();
        adapter.subscribe(&adapter.path_list().await).await.unwrap();
        adapter.unsubscribe_all().await;

        adapter
            .set(values(&[("Signal.Body.Trunk.IsOpen", SignalValue::Bool(false))]))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sequence_grows_with_each_change() {
        let adapter = trunk();
        let a = adapter
            .update(values(&[("Signal.Body.Trunk.IsOpen", SignalValue::Bool(false))]))
            .await
            .unwrap();
        let b = adapter
            .update(values(&[("Signal.Body.Trunk.IsOpen", SignalValue::Bool(true))]))
            .await
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_full_stream_blocks_writer() {
        let adapter = BaseAdapter::with_capacity("tiny", 1)
            .with_signal("Signal.Speed", SignalSpec::new(0i64));
        let mut rx = adapter.change_stream().unwrap();
        adapter.subscribe(&paths(&["Signal.Speed"])).await.unwrap();

        adapter
            .update(values(&[("Signal.Speed", SignalValue::from(1i64))]))
            .await
            .unwrap();

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            adapter.update(values(&[("Signal.Speed", SignalValue::from(2i64))])),
        )
        .await;
        assert!(blocked.is_err(), "second write should wait for capacity");

        assert!(rx.recv().await.is_some());
    }
}
