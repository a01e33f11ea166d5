//! Emergency vehicle preemption.

pub mod event;
pub mod supervisor;

pub use event::{EmergencyEvent, Resolution};
pub use supervisor::{EmergencyOutcome, PreemptionPolicy, PreemptionSupervisor, PreemptionUpdate};
