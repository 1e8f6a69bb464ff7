//! Propagation of window-set changes to schedulers.
//!
//! This crate provides:
//! - The [`Propagator`] trait and the closed set of strategies
//! - In-process, polling, and ZeroMQ-bus implementations
//! - Settings loading and the strategy factory

pub mod bus;
pub mod error;
pub mod kind;
pub mod local;
pub mod poll;
pub mod traits;

pub use bus::{BusConfig, BusEndpoint, BusPropagator, ReloadSignal, RELOAD_TOPIC};
pub use error::PropagateError;
pub use kind::{build_propagator, PropagateSettings, PropagatorKind};
pub use local::LocalPropagator;
pub use poll::PollPropagator;
pub use traits::{NullPropagator, Propagator};
