//! Permission resolvers behind the `PermissionResolver` port

mod http;
mod static_table;

pub use http::HttpPermissionResolver;
pub use static_table::StaticPermissionResolver;

use std::sync::Arc;
use std::time::Duration;
use vis_ports::{PermissionResolver, ResolveError};

use crate::infrastructure::config::PermissionConfig;

/// Build the resolver a configuration asks for
pub fn resolver_from_config(
    config: &PermissionConfig,
) -> Result<Arc<dyn PermissionResolver>, ResolveError> {
    match config {
        PermissionConfig::Static { ttl, tokens } => Ok(Arc::new(StaticPermissionResolver::new(
            tokens.clone(),
            *ttl,
        ))),
        PermissionConfig::Http { url, timeout_ms } => Ok(Arc::new(HttpPermissionResolver::new(
            url.clone(),
            Duration::from_millis(*timeout_ms),
        )?)),
    }
}
