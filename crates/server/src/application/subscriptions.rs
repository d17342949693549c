//! Subscription table and change fan-out
//!
//! Each websocket connection registers a notification sink here. The table
//! holds only weak handles to the sinks so a connection that goes away
//! without cleaning up never keeps its channel alive; notifications for it
//! are dropped until `disconnect` removes its subscriptions.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;
use vis_core::{PathMatcher, SignalValue};
use vis_ports::{Clock, SignalMap};

use crate::error::VisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = VisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(SubscriptionId)
            .map_err(|_| VisError::SubscriptionNotFound(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One push to one subscription: every matching path that changed in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subscription_id: SubscriptionId,
    pub values: SignalMap,
    pub timestamp: i64,
}

struct Subscription {
    connection: ConnectionId,
    matcher: PathMatcher,
    /// Paths the subscriber may see; `None` means every match
    visible: Option<HashSet<String>>,
}

impl Subscription {
    fn accepts(&self, path: &str) -> bool {
        self.matcher.matches(path)
            && self
                .visible
                .as_ref()
                .is_none_or(|visible| visible.contains(path))
    }
}

#[derive(Default)]
struct Table {
    sinks: HashMap<ConnectionId, mpsc::WeakSender<Notification>>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
}

pub struct SubscriptionManager {
    table: Mutex<Table>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl SubscriptionManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        SubscriptionManager {
            table: Mutex::new(Table::default()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Attach the sink notifications for `connection` are delivered to
    pub fn connect(&self, connection: ConnectionId, sink: &mpsc::Sender<Notification>) {
        self.table.lock().sinks.insert(connection, sink.downgrade());
        tracing::debug!(connection = %connection, "connection registered");
    }

    /// Forget the sink and every subscription of `connection`
    pub fn disconnect(&self, connection: ConnectionId) -> usize {
        let mut table = self.table.lock();
        table.sinks.remove(&connection);
        let removed = remove_all(&mut table, connection);
        tracing::debug!(connection = %connection, removed, "connection closed");
        removed
    }

    /// Subscribe to every path `pattern` matches, with no visibility limit
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        pattern: &str,
    ) -> Result<SubscriptionId, VisError> {
        let matcher = PathMatcher::compile(pattern)?;
        Ok(self.insert(connection, matcher, None))
    }

    /// Subscribe to the matches of `matcher` restricted to `visible`
    pub fn subscribe_filtered(
        &self,
        connection: ConnectionId,
        matcher: PathMatcher,
        visible: HashSet<String>,
    ) -> SubscriptionId {
        self.insert(connection, matcher, Some(visible))
    }

    fn insert(
        &self,
        connection: ConnectionId,
        matcher: PathMatcher,
        visible: Option<HashSet<String>>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            connection = %connection,
            subscription = %id,
            pattern = %matcher,
            "subscribed"
        );
        self.table.lock().subscriptions.insert(
            id,
            Subscription {
                connection,
                matcher,
                visible,
            },
        );
        id
    }

    /// Remove one subscription owned by `connection`
    pub fn unsubscribe(&self, connection: ConnectionId, id: SubscriptionId) -> Result<(), VisError> {
        let mut table = self.table.lock();
        match table.subscriptions.get(&id) {
            Some(sub) if sub.connection == connection => {
                table.subscriptions.remove(&id);
                Ok(())
            }
            _ => Err(VisError::SubscriptionNotFound(id.to_string())),
        }
    }

    /// Remove every subscription owned by `connection`; returns how many
    pub fn unsubscribe_all(&self, connection: ConnectionId) -> usize {
        remove_all(&mut self.table.lock(), connection)
    }

    pub fn dispatch(&self, path: &str, value: &SignalValue) -> usize {
        let mut changes = SignalMap::new();
        changes.insert(path.to_string(), value.clone());
        self.dispatch_batch(&changes)
    }

    /// Fan a set of changes out to every subscription they match.
    ///
    /// Each subscription gets at most one notification per call. Returns the
    /// number of notifications queued.
    pub fn dispatch_batch(&self, changes: &SignalMap) -> usize {
        if changes.is_empty() {
            return 0;
        }
        let timestamp = self.clock.now_millis();
        let table = self.table.lock();
        let mut delivered = 0;

        for (id, sub) in &table.subscriptions {
            let values: SignalMap = changes
                .iter()
                .filter(|(path, _)| sub.accepts(path))
                .map(|(path, value)| (path.clone(), value.clone()))
                .collect();
            if values.is_empty() {
                continue;
            }

            let Some(sink) = table.sinks.get(&sub.connection).and_then(|s| s.upgrade()) else {
                tracing::debug!(subscription = %id, "no live sink, dropping notification");
                continue;
            };

            let notification = Notification {
                subscription_id: *id,
                values,
                timestamp,
            };
            match sink.try_send(notification) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection = %sub.connection,
                        subscription = %id,
                        "outbound queue full, dropping notification"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscription = %id, "sink closed, dropping notification");
                }
            }
        }

        delivered
    }

    /// Compiled pattern of every subscription owned by `connection`
    pub fn patterns_of(&self, connection: ConnectionId) -> Vec<(SubscriptionId, PathMatcher)> {
        self.table
            .lock()
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.connection == connection)
            .map(|(id, sub)| (*id, sub.matcher.clone()))
            .collect()
    }

    /// Replace the paths a subscription may deliver; false if it is gone
    pub fn set_visible(
        &self,
        connection: ConnectionId,
        id: SubscriptionId,
        visible: HashSet<String>,
    ) -> bool {
        match self.table.lock().subscriptions.get_mut(&id) {
            Some(sub) if sub.connection == connection => {
                sub.visible = Some(visible);
                true
            }
            _ => false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.table.lock().subscriptions.len()
    }

    pub fn subscriptions_of(&self, connection: ConnectionId) -> Vec<SubscriptionId> {
        self.table
            .lock()
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.connection == connection)
            .map(|(id, _)| *id)
            .collect()
    }
}

fn remove_all(table: &mut Table, connection: ConnectionId) -> usize {
    let before = table.subscriptions.len();
    table
        .subscriptions
        .retain(|_, sub| sub.connection != connection);
    before - table.subscriptions.len()
}
