pub mod config;
pub mod permission;

pub use config::{ConfigError, PermissionConfig, ServerConfig, VisConfig};
pub use permission::{HttpPermissionResolver, StaticPermissionResolver, resolver_from_config};
