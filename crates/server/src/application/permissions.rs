//! Token authorization and per-path access checks

use std::collections::BTreeMap;
use std::sync::Arc;
use vis_core::{AccessLevel, PermissionMap};
use vis_ports::PermissionResolver;

use crate::error::VisError;

/// Result of a successful `authorize`
#[derive(Debug, Clone, Default)]
pub struct Authorization {
    pub permissions: PermissionMap,
    pub ttl_secs: u64,
}

/// Authorization state of one connection.
///
/// Starts unauthenticated with no grants. Each successful authorization
/// replaces the grant table wholesale.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    authorized: bool,
    permissions: PermissionMap,
    ttl_secs: u64,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permissions(permissions: PermissionMap) -> Self {
        AuthSession {
            authorized: true,
            permissions,
            ttl_secs: 0,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn permissions(&self) -> &PermissionMap {
        &self.permissions
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn grant(&mut self, authorization: Authorization) {
        self.authorized = true;
        self.permissions = authorization.permissions;
        self.ttl_secs = authorization.ttl_secs;
    }

    pub fn can_read(&self, path: &str, is_public: bool) -> bool {
        is_public || self.permissions.can_read(path)
    }

    /// Public paths are readable by anyone, never writable by anyone without a grant
    pub fn can_write(&self, path: &str) -> bool {
        self.permissions.can_write(path)
    }

    /// The error a denied access to `subject` maps to for this session
    pub fn denial(&self, subject: &str) -> VisError {
        if self.authorized {
            VisError::Forbidden(subject.to_string())
        } else {
            VisError::NotAuthorized(subject.to_string())
        }
    }

    pub fn check_read(&self, path: &str, is_public: bool) -> Result<(), VisError> {
        if self.can_read(path, is_public) {
            Ok(())
        } else {
            Err(self.denial(path))
        }
    }

    pub fn check_write(&self, path: &str) -> Result<(), VisError> {
        if self.can_write(path) {
            Ok(())
        } else {
            Err(self.denial(path))
        }
    }
}

/// Turns client tokens into compiled grant tables
pub struct PermissionGate {
    resolver: Arc<dyn PermissionResolver>,
}

impl PermissionGate {
    pub fn new(resolver: Arc<dyn PermissionResolver>) -> Self {
        PermissionGate { resolver }
    }

    pub fn resolver_name(&self) -> &str {
        self.resolver.name()
    }

    pub async fn authorize(&self, token: &str) -> Result<Authorization, VisError> {
        if token.trim().is_empty() {
            return Err(VisError::AuthFailed("empty token".into()));
        }

        let grant = self.resolver.resolve(token).await.map_err(|e| {
            tracing::info!(resolver = %self.resolver.name(), "authorization rejected: {}", e);
            VisError::from(e)
        })?;

        let permissions = compile_grants(&grant.permissions);
        tracing::debug!(grants = permissions.len(), ttl = grant.ttl_secs, "token authorized");

        Ok(Authorization {
            permissions,
            ttl_secs: grant.ttl_secs,
        })
    }
}

/// Compile a raw grant table; malformed patterns are logged and skipped
pub fn compile_grants(grants: &BTreeMap<String, AccessLevel>) -> PermissionMap {
    let (permissions, rejected) =
        PermissionMap::compile(grants.iter().map(|(pattern, level)| (pattern, *level)));
    for err in rejected {
        tracing::warn!("ignoring permission entry: {}", err);
    }
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vis_ports::{PermissionGrant, ResolveError};

    struct OneToken;

    #[async_trait]
    impl PermissionResolver for OneToken {
        async fn resolve(&self, token: &str) -> Result<PermissionGrant, ResolveError> {
            if token != "secret" {
                return Err(ResolveError::Denied("unknown token".into()));
            }
            let mut permissions = BTreeMap::new();
            permissions.insert("Signal.Body.*".to_string(), AccessLevel::ReadWrite);
            permissions.insert("Signal..Broken".to_string(), AccessLevel::Read);
            Ok(PermissionGrant {
                permissions,
                ttl_secs: 60,
            })
        }
    }

    fn grants(items: &[(&str, AccessLevel)]) -> PermissionMap {
        PermissionMap::compile(items.iter().map(|(p, l)| (*p, *l))).0
    }

    #[test]
    fn test_unauthenticated_session_reads_public_only() {
        let session = AuthSession::new();
        assert!(session.check_read("Attribute.Vehicle.VIN", true).is_ok());
        assert_eq!(
            session.check_read("Signal.Body.Trunk.IsOpen", false),
            Err(VisError::NotAuthorized("Signal.Body.Trunk.IsOpen".into()))
        );
    }

    #[test]
    fn test_public_does_not_imply_writable() {
        let session = AuthSession::with_permissions(grants(&[("Signal.X", AccessLevel::Read)]));
        assert!(session.can_read("Attribute.Vehicle.VIN", true));
        assert_eq!(
            session.check_write("Attribute.Vehicle.VIN"),
            Err(VisError::Forbidden("Attribute.Vehicle.VIN".into()))
        );
    }

    #[test]
    fn test_write_only_grant() {
        let session = AuthSession::with_permissions(grants(&[("Signal.*", AccessLevel::Write)]));
        assert!(!session.can_read("Signal.A", false));
        assert!(session.can_write("Signal.A"));
    }

    #[tokio::test]
    async fn test_authorize_replaces_grants() {
        let gate = PermissionGate::new(Arc::new(OneToken));
        let mut session = AuthSession::with_permissions(grants(&[("Signal.Cabin.*", AccessLevel::Read)]));

        session.grant(gate.authorize("secret").await.unwrap());

        assert!(session.is_authorized());
        assert_eq!(session.ttl_secs(), 60);
        // The malformed entry is dropped and the old grants are gone.
        assert_eq!(session.permissions().len(), 1);
        assert!(session.can_write("Signal.Body.Trunk.IsLocked"));
        assert!(!session.can_read("Signal.Cabin.Door.IsOpen", false));
    }

    #[tokio::test]
    async fn test_authorize_rejects_bad_and_empty_tokens() {
        let gate = PermissionGate::new(Arc::new(OneToken));
        assert!(matches!(gate.authorize("nope").await, Err(VisError::AuthFailed(_))));
        assert!(matches!(gate.authorize("  ").await, Err(VisError::AuthFailed(_))));
    }
}
