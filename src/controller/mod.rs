//! Control loop
//!
//! The [`Controller`] arbitrates one tick at a time; the [`ControlLoop`]
//! drives it in real time from a bounded inbox.

pub mod approaches;
pub mod arbitrator;
pub mod inbox;
pub mod runtime;

pub use approaches::{ApproachState, ApproachTable, TelemetryOutcome};
pub use arbitrator::{Controller, RejectedInput, StateSnapshot, StepReport};
pub use inbox::{
    AdvisoryReport, ControlInput, EmergencyReport, Inbox, InboxSender, ModeCommand,
    TelemetryReport, inbox,
};
pub use runtime::{ControlLoop, publish_step};
