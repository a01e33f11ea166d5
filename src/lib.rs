//! `greenwave` - adaptive signal-phase control with emergency preemption
//!
//! The controller runs one intersection: it picks which phase gets green
//! and for how long, always inserting yellow and all-red clearance between
//! conflicting movements, and preempts normal operation when an emergency
//! vehicle is detected.
//!
//! The synchronous core ([`controller::Controller`]) is deterministic and
//! driven one tick at a time; [`controller::ControlLoop`] runs it on a
//! tokio interval for live operation.

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod observability;
pub mod preempt;
pub mod signal;
pub mod strategy;
pub mod topology;

pub use controller::{ControlInput, ControlLoop, Controller, StateSnapshot};
pub use error::{GreenwaveError, Result};
pub use topology::Topology;
