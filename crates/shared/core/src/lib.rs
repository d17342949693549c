//! VIS Core Domain
//!
//! Pure domain types for the Vehicle Information Service.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod path;
pub mod permission;
pub mod value;

use chrono::{DateTime, Utc};

// Re-export commonly used types at crate root
pub use path::{PathMatcher, PatternError, ends_with_segments};
pub use permission::{AccessLevel, ParseAccessLevelError, PermissionMap};
pub use value::{SignalValue, ValueError};

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;
