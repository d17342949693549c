pub mod permissions;
pub mod registry;
pub mod subscriptions;

pub use permissions::{AuthSession, Authorization, PermissionGate, compile_grants};
pub use registry::{SetValue, SignalEntry, SignalRegistry};
pub use subscriptions::{ConnectionId, Notification, SubscriptionId, SubscriptionManager};
