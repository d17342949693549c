//! VIS Adapters
//!
//! Signal sources bound into the broker through the `AdapterBinding` port:
//! - `BaseAdapter`: the shared mutex-guarded store most adapters sit on
//! - `FileAdapter`: static attributes from a JSON document
//! - `HttpPollAdapter`: telemetry polled from an HTTP endpoint
//! - `SimulatorAdapter`: seeded random signals and a generated VIN
//!
//! `AdapterFactory` builds them by type name from configuration.

pub mod base;
pub mod factory;
pub mod file;
pub mod http;
pub mod simulator;

pub use base::{BaseAdapter, DEFAULT_CHANGE_CAPACITY, SignalSpec};
pub use factory::{AdapterConstructor, AdapterFactory, AdapterSpec};
pub use file::{FileAdapter, FileAdapterConfig};
pub use http::{Backoff, HttpAdapterConfig, HttpPollAdapter};
pub use simulator::{SignalKind, SimulatedSignal, SimulatorAdapter, SimulatorConfig, generate_vin};
