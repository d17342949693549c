//! VIS Ports
//!
//! Port definitions (traits) for the Vehicle Information Service.
//! These define the boundaries between the broker and its collaborators:
//! signal sources, the permission service and the clock.

mod adapter;
mod clock;
mod error;
mod permission;

pub use adapter::{AdapterBinding, ChangeBatch, PathSet, SignalMap};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{AdapterError, AdapterResult, ResolveError};
pub use permission::{PermissionGrant, PermissionResolver};
