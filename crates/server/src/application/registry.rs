//! Signal registry
//!
//! Single authoritative table of every signal path the adapters expose. The
//! registry caches the last known value of each path, routes client writes to
//! the owning adapter and folds adapter change batches back in, handing every
//! real change to the [`SubscriptionManager`].
//!
//! Writes and change batches are ordered by the per-adapter sequence number
//! the adapter assigns. An entry only moves forward: a batch older than the
//! last one applied to a path is ignored, which makes a client write visible
//! on return without the adapter's echo of it notifying twice.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vis_core::{PathMatcher, SignalValue, ends_with_segments};
use vis_ports::{AdapterBinding, ChangeBatch, SignalMap};

use crate::application::permissions::AuthSession;
use crate::application::subscriptions::SubscriptionManager;
use crate::error::VisError;

#[derive(Debug, Clone, PartialEq)]
pub struct SignalEntry {
    pub path: String,
    pub value: SignalValue,
    pub is_public: bool,
    pub is_read_only: bool,
    /// False until the owning adapter has reported a value
    pub initialized: bool,
    /// Index of the owning adapter
    pub adapter: usize,
    seq: u64,
}

/// Payload of a client write
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    /// One value for every matched path
    Broadcast(SignalValue),
    /// `(suffix, value)` pairs, each applied to the matched paths ending in `suffix`
    PerSuffix(Vec<(String, SignalValue)>),
}

impl TryFrom<Value> for SetValue {
    type Error = VisError;

    /// A non-empty array whose items are all single-key objects is the
    /// per-suffix form; anything else must be a plain value.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) if is_suffix_list(&items) => {
                let mut pairs = Vec::with_capacity(items.len());
                for fields in items.into_iter().filter_map(|item| match item {
                    Value::Object(fields) => Some(fields),
                    _ => None,
                }) {
                    for (suffix, raw) in fields {
                        if suffix.is_empty() {
                            return Err(VisError::BadRequest("empty path suffix".into()));
                        }
                        let value = SignalValue::try_from(raw)
                            .map_err(|e| VisError::BadRequest(format!("{}: {}", suffix, e)))?;
                        pairs.push((suffix, value));
                    }
                }
                Ok(SetValue::PerSuffix(pairs))
            }
            other => SignalValue::try_from(other)
                .map(SetValue::Broadcast)
                .map_err(|e| VisError::BadRequest(e.to_string())),
        }
    }
}

fn is_suffix_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| matches!(item, Value::Object(fields) if fields.len() == 1))
}

struct Target {
    value: SignalValue,
    adapter: usize,
    read_only: bool,
}

pub struct SignalRegistry {
    entries: RwLock<HashMap<String, SignalEntry>>,
    adapters: RwLock<Vec<Arc<dyn AdapterBinding>>>,
    subscriptions: Arc<SubscriptionManager>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    // Held across the adapter calls of one registration.
    registering: tokio::sync::Mutex<()>,
}

impl SignalRegistry {
    pub fn new(subscriptions: Arc<SubscriptionManager>, shutdown: CancellationToken) -> Self {
        SignalRegistry {
            entries: RwLock::new(HashMap::new()),
            adapters: RwLock::new(Vec::new()),
            subscriptions,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            registering: tokio::sync::Mutex::new(()),
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Take ownership of every path `adapter` exposes.
    ///
    /// Fails without registering anything if one of its paths is already
    /// owned. On success the adapter's change stream is drained into the
    /// registry and its background work is started.
    pub async fn register_adapter(
        self: &Arc<Self>,
        adapter: Arc<dyn AdapterBinding>,
    ) -> Result<(), VisError> {
        let _registering = self.registering.lock().await;
        let name = adapter.name().to_string();
        let paths = adapter.path_list().await;

        {
            let entries = self.entries.read();
            if let Some(existing) = paths.iter().find_map(|p| entries.get(p)) {
                let owner = self
                    .adapters
                    .read()
                    .get(existing.adapter)
                    .map(|a| a.name().to_string())
                    .unwrap_or_default();
                return Err(VisError::DuplicatePath {
                    path: existing.path.clone(),
                    owner,
                });
            }
        }

        let mut flags = Vec::with_capacity(paths.len());
        for path in &paths {
            let is_public = adapter.is_public(path).await?;
            let is_read_only = adapter.is_read_only(path).await?;
            flags.push((path.clone(), is_public, is_read_only));
        }

        let stream = adapter.change_stream();
        if stream.is_none() {
            tracing::warn!(adapter = %name, "no change stream, adapter updates will not be seen");
        }
        // Subscribe before reading so no change falls between the two.
        adapter.subscribe(&paths).await?;
        let values = adapter.get(&paths).await.unwrap_or_else(|e| {
            tracing::warn!(adapter = %name, "initial read failed: {}", e);
            SignalMap::new()
        });

        let index = {
            let mut adapters = self.adapters.write();
            adapters.push(Arc::clone(&adapter));
            adapters.len() - 1
        };

        {
            let mut entries = self.entries.write();
            for (path, is_public, is_read_only) in flags {
                let initial = values.get(&path).cloned();
                entries.insert(
                    path.clone(),
                    SignalEntry {
                        path,
                        initialized: initial.is_some(),
                        value: initial.unwrap_or_default(),
                        is_public,
                        is_read_only,
                        adapter: index,
                        seq: 0,
                    },
                );
            }
        }

        let mut tasks = Vec::new();
        if let Some(rx) = stream {
            tasks.push(self.spawn_feed(index, name.clone(), rx));
        }
        if let Some(handle) = Arc::clone(&adapter).start(self.shutdown.child_token()) {
            tasks.push(handle);
        }
        self.tasks.lock().extend(tasks);

        tracing::info!(adapter = %name, signals = paths.len(), "adapter registered");
        Ok(())
    }

    fn spawn_feed(
        self: &Arc<Self>,
        index: usize,
        name: String,
        mut rx: mpsc::Receiver<ChangeBatch>,
    ) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    batch = rx.recv() => {
                        let Some(batch) = batch else { break };
                        let Some(registry) = registry.upgrade() else { break };
                        registry.apply_external_update(index, &batch);
                    }
                }
            }
            tracing::debug!(adapter = %name, "change feed stopped");
        })
    }

    /// Fold an adapter change batch into the cache; returns how many paths changed
    pub fn apply_external_update(&self, adapter: usize, batch: &ChangeBatch) -> usize {
        self.apply(adapter, batch.seq, &batch.values)
    }

    fn apply(&self, adapter: usize, seq: u64, values: &SignalMap) -> usize {
        let mut entries = self.entries.write();
        let mut changed = SignalMap::new();

        for (path, value) in values {
            let Some(entry) = entries.get_mut(path) else {
                tracing::warn!(path = %path, "change for unregistered path ignored");
                continue;
            };
            if entry.adapter != adapter {
                tracing::warn!(path = %path, adapter, "change from non-owning adapter ignored");
                continue;
            }
            if seq < entry.seq {
                continue;
            }
            entry.seq = seq;
            if entry.initialized && entry.value == *value {
                continue;
            }
            entry.value = value.clone();
            entry.initialized = true;
            changed.insert(path.clone(), value.clone());
        }

        // Dispatched under the entries lock so notifications follow apply order.
        self.subscriptions.dispatch_batch(&changed);
        changed.len()
    }

    /// Current values of the matched paths `session` may read
    pub fn get(&self, pattern: &str, session: &AuthSession) -> Result<SignalMap, VisError> {
        let matcher = PathMatcher::compile(pattern)?;
        let entries = self.entries.read();
        let values: SignalMap = readable(&entries, &matcher, session)?
            .into_iter()
            .map(|entry| (entry.path.clone(), entry.value.clone()))
            .collect();
        Ok(values)
    }

    /// Compiled pattern plus the matched paths `session` may read
    pub fn readable_paths(
        &self,
        pattern: &str,
        session: &AuthSession,
    ) -> Result<(PathMatcher, HashSet<String>), VisError> {
        let matcher = PathMatcher::compile(pattern)?;
        let paths = {
            let entries = self.entries.read();
            readable(&entries, &matcher, session)?
                .into_iter()
                .map(|entry| entry.path.clone())
                .collect()
        };
        Ok((matcher, paths))
    }

    /// Matched paths `session` may read; empty when none are
    pub fn visible_paths(&self, matcher: &PathMatcher, session: &AuthSession) -> HashSet<String> {
        let entries = self.entries.read();
        matching(&entries, matcher)
            .into_iter()
            .filter(|entry| session.can_read(&entry.path, entry.is_public))
            .map(|entry| entry.path.clone())
            .collect()
    }

    /// Write through to the owning adapters.
    ///
    /// Every target is checked before anything is written: a read-only
    /// target fails the whole request, then a target without write grant.
    pub async fn set(
        &self,
        pattern: &str,
        value: SetValue,
        session: &AuthSession,
    ) -> Result<(), VisError> {
        let matcher = PathMatcher::compile(pattern)?;
        let targets = {
            let entries = self.entries.read();
            let matched = matching(&entries, &matcher);
            if matched.is_empty() {
                return Err(VisError::PathNotFound(pattern.to_string()));
            }
            resolve_targets(&matched, value)?
        };

        if let Some((path, _)) = targets.iter().find(|(_, t)| t.read_only) {
            return Err(VisError::ReadOnlyViolation(path.clone()));
        }
        for path in targets.keys() {
            session.check_write(path)?;
        }

        let mut groups: BTreeMap<usize, SignalMap> = BTreeMap::new();
        for (path, target) in targets {
            groups
                .entry(target.adapter)
                .or_default()
                .insert(path, target.value);
        }

        for (index, values) in groups {
            let adapter = self
                .adapters
                .read()
                .get(index)
                .cloned()
                .ok_or_else(|| VisError::AdapterUnavailable(format!("adapter #{}", index)))?;
            let seq = adapter.set(values.clone()).await?;
            self.apply(index, seq, &values);
        }

        Ok(())
    }

    pub fn entry(&self, path: &str) -> Option<SignalEntry> {
        self.entries.read().get(path).cloned()
    }

    /// Every registered path, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters
            .read()
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Stop the change feeds and adapter tasks, then release adapter subscriptions
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("registry task ended abnormally: {}", e);
            }
        }
        let adapters: Vec<_> = self.adapters.read().clone();
        for adapter in adapters {
            adapter.unsubscribe_all().await;
        }
        tracing::info!("signal registry stopped");
    }
}

fn matching<'a>(
    entries: &'a HashMap<String, SignalEntry>,
    matcher: &PathMatcher,
) -> Vec<&'a SignalEntry> {
    if matcher.is_literal() {
        return entries.get(matcher.pattern()).into_iter().collect();
    }
    entries
        .values()
        .filter(|entry| matcher.matches(&entry.path))
        .collect()
}

fn readable<'a>(
    entries: &'a HashMap<String, SignalEntry>,
    matcher: &PathMatcher,
    session: &AuthSession,
) -> Result<Vec<&'a SignalEntry>, VisError> {
    let matched = matching(entries, matcher);
    if matched.is_empty() {
        return Err(VisError::PathNotFound(matcher.pattern().to_string()));
    }
    let visible: Vec<&SignalEntry> = matched
        .into_iter()
        .filter(|entry| session.can_read(&entry.path, entry.is_public))
        .collect();
    if visible.is_empty() {
        return Err(session.denial(matcher.pattern()));
    }
    Ok(visible)
}

fn resolve_targets(
    matched: &[&SignalEntry],
    value: SetValue,
) -> Result<BTreeMap<String, Target>, VisError> {
    let mut targets = BTreeMap::new();
    let mut add = |entry: &SignalEntry, value: SignalValue| {
        targets.insert(
            entry.path.clone(),
            Target {
                value,
                adapter: entry.adapter,
                read_only: entry.is_read_only,
            },
        );
    };

    match value {
        SetValue::Broadcast(value) => {
            for entry in matched.iter().copied() {
                add(entry, value.clone());
            }
        }
        SetValue::PerSuffix(pairs) => {
            for (suffix, value) in pairs {
                let hits: Vec<&SignalEntry> = matched
                    .iter()
                    .copied()
                    .filter(|entry| ends_with_segments(&entry.path, &suffix))
                    .collect();
                if hits.is_empty() {
                    return Err(VisError::PathNotFound(suffix));
                }
                for entry in hits {
                    add(entry, value.clone());
                }
            }
        }
    }

    Ok(targets)
}
