use async_trait::async_trait;
use std::collections::BTreeMap;
use vis_core::AccessLevel;

use crate::error::ResolveError;

/// Permissions the permission service hands out for one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    /// Path pattern → access level
    pub permissions: BTreeMap<String, AccessLevel>,
    /// Seconds the grant is valid for, reported back to the client
    pub ttl_secs: u64,
}

/// Port for token → permission lookup
///
/// Backed by a local table, a local IPC call or a remote service; the
/// contract is the same either way.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<PermissionGrant, ResolveError>;

    fn name(&self) -> &str {
        "PermissionResolver"
    }
}
