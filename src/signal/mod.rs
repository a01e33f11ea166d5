//! Signal state and the phase state machine.

pub mod machine;
pub mod state;

pub use machine::{PhaseStateMachine, PreemptTiming};
pub use state::{
    Commit, Correction, PreemptedFrom, PreemptionStage, SignalSnapshot, SignalState, SubState,
    Transition,
};
