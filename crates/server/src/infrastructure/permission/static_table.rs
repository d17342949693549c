use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use vis_core::AccessLevel;
use vis_ports::{PermissionGrant, PermissionResolver, ResolveError};

/// Fixed token → grant table, loaded from configuration
pub struct StaticPermissionResolver {
    tokens: HashMap<String, BTreeMap<String, AccessLevel>>,
    ttl_secs: u64,
}

impl StaticPermissionResolver {
    pub fn new(
        tokens: impl IntoIterator<Item = (String, BTreeMap<String, AccessLevel>)>,
        ttl_secs: u64,
    ) -> Self {
        StaticPermissionResolver {
            tokens: tokens.into_iter().collect(),
            ttl_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl PermissionResolver for StaticPermissionResolver {
    async fn resolve(&self, token: &str) -> Result<PermissionGrant, ResolveError> {
        self.tokens
            .get(token)
            .map(|permissions| PermissionGrant {
                permissions: permissions.clone(),
                ttl_secs: self.ttl_secs,
            })
            .ok_or_else(|| ResolveError::Denied("unknown token".into()))
    }

    fn name(&self) -> &str {
        "StaticPermissionResolver"
    }
}
