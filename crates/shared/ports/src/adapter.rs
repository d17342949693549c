use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vis_core::SignalValue;

use crate::error::AdapterResult;

/// Concrete path → value mapping
pub type SignalMap = BTreeMap<String, SignalValue>;

/// Set of concrete paths
pub type PathSet = BTreeSet<String>;

/// One batch of changed values pushed by an adapter.
///
/// `seq` is taken from a per-adapter counter that only grows, under the same
/// lock that applied the change, so a consumer can discard any batch that is
/// not newer than what it has already applied for a path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub seq: u64,
    pub values: SignalMap,
}

/// Port every signal source satisfies
///
/// The broker never reaches into an adapter's storage; it enumerates paths,
/// reads and writes through this contract and listens on the change stream.
#[async_trait]
pub trait AdapterBinding: Send + Sync {
    /// Unique adapter name, used in logs and configuration
    fn name(&self) -> &str;

    /// Every path this adapter owns. Fixed after construction.
    async fn path_list(&self) -> PathSet;

    /// Readable without authorization
    async fn is_public(&self, path: &str) -> AdapterResult<bool>;

    /// Rejects client writes
    async fn is_read_only(&self, path: &str) -> AdapterResult<bool>;

    /// Read current values. Fails with `PathNotFound` if any path is unknown.
    async fn get(&self, paths: &PathSet) -> AdapterResult<SignalMap>;

    /// Client write. Fails with `PathNotFound` or `ReadOnly` without writing
    /// anything. Returns the sequence number the write landed at; changed
    /// paths that are subscribed are pushed on the change stream under that
    /// sequence number.
    async fn set(&self, values: SignalMap) -> AdapterResult<u64>;

    /// Start pushing changes for these paths
    async fn subscribe(&self, paths: &PathSet) -> AdapterResult<()>;

    /// Stop pushing changes for these paths
    async fn unsubscribe(&self, paths: &PathSet) -> AdapterResult<()>;

    /// Stop pushing changes for every path
    async fn unsubscribe_all(&self);

    /// Take the receiving end of the change stream. Only the first caller
    /// gets it.
    fn change_stream(&self) -> Option<mpsc::Receiver<ChangeBatch>>;

    /// Spawn the adapter's own background work (polling, simulation).
    /// Adapters without any return `None`.
    fn start(self: Arc<Self>, _shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        None
    }
}
