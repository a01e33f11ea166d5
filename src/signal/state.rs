//! Signal state representation
//!
//! The authoritative [`SignalState`] is owned by the phase state machine.
//! Everything else reads [`SignalSnapshot`] copies.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::{ControlMode, FallbackReason};
use crate::topology::{ApproachId, PhaseId};

// ============================================================================
// Sub-States
// ============================================================================

/// Sub-state of the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubState {
    /// A normal phase is green
    Green,
    /// Change interval after a green
    Yellow,
    /// All approaches red between normal phases
    AllRed,
    /// All-red clearance before preemptive green
    PreemptClear,
    /// Emergency approaches green
    PreemptGreen,
    /// All-red recovery after preemptive green
    PreemptRecovery,
}

impl SubState {
    /// Upper-case name used in logs and snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::AllRed => "ALL_RED",
            Self::PreemptClear => "PREEMPT_CLEAR",
            Self::PreemptGreen => "PREEMPT_GREEN",
            Self::PreemptRecovery => "PREEMPT_RECOVERY",
        }
    }

    /// Numeric code exported as a metrics gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Green => 0,
            Self::Yellow => 1,
            Self::AllRed => 2,
            Self::PreemptClear => 3,
            Self::PreemptGreen => 4,
            Self::PreemptRecovery => 5,
        }
    }

    /// Returns `true` for sub-states during which some approach may move.
    #[must_use]
    pub const fn is_green(self) -> bool {
        matches!(self, Self::Green | Self::PreemptGreen)
    }

    /// Returns `true` for the mandatory intervals no request may shorten.
    #[must_use]
    pub const fn is_mandatory(self) -> bool {
        matches!(
            self,
            Self::Yellow | Self::AllRed | Self::PreemptClear | Self::PreemptRecovery
        )
    }
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Signal State
// ============================================================================

/// What normal operation looked like when a preemption took over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreemptedFrom {
    /// Phase that was green, or had just been vacated
    pub phase: Option<PhaseId>,
    /// Mode active at the time
    pub mode: ControlMode,
    /// Rotation position of that phase
    pub cycle_position: Option<usize>,
}

/// The single mutable source of truth for the signal.
#[derive(Debug, Clone)]
pub struct SignalState {
    /// Current phase during GREEN/YELLOW; the last phase served otherwise
    pub phase: Option<PhaseId>,
    /// Current sub-state
    pub sub_state: SubState,
    /// Time spent in the current sub-state
    pub elapsed: Duration,
    /// Required length of the current sub-state
    pub required: Duration,
    /// Mode that produced the last committed decision
    pub mode: ControlMode,
    /// Normal operation interrupted by the current preemption
    pub preempted_from: Option<PreemptedFrom>,
    /// Rotation position of the last committed phase
    pub cycle_position: Option<usize>,
    /// Approaches held green by the current preemption
    pub preempt_approaches: BTreeSet<ApproachId>,
    /// Fallback flag of the last committed decision
    pub fallback: Option<FallbackReason>,
}

impl SignalState {
    /// Initial state: ALL_RED for `all_red`, no prior phase.
    #[must_use]
    pub const fn new(mode: ControlMode, all_red: Duration) -> Self {
        Self {
            phase: None,
            sub_state: SubState::AllRed,
            elapsed: Duration::ZERO,
            required: all_red,
            mode,
            preempted_from: None,
            cycle_position: None,
            preempt_approaches: BTreeSet::new(),
            fallback: None,
        }
    }

    /// Time left in the current sub-state.
    #[must_use]
    pub const fn remaining(&self) -> Duration {
        self.required.saturating_sub(self.elapsed)
    }
}

/// Immutable copy of the signal state with derived fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSnapshot {
    /// Current or last phase
    pub phase: Option<PhaseId>,
    /// Current sub-state
    pub sub_state: SubState,
    /// Time spent in the sub-state
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Time left in the sub-state
    #[serde(rename = "remainingMs", serialize_with = "as_millis")]
    pub remaining: Duration,
    /// Mode of the last committed decision
    pub mode: ControlMode,
    /// Interrupted normal operation, while preempting
    pub preempted_from: Option<PreemptedFrom>,
    /// Approaches held by the current preemption
    pub preempt_approaches: BTreeSet<ApproachId>,
    /// Fallback flag of the last committed decision
    pub fallback: Option<FallbackReason>,
}

impl From<&SignalState> for SignalSnapshot {
    fn from(state: &SignalState) -> Self {
        Self {
            phase: state.phase.clone(),
            sub_state: state.sub_state,
            elapsed: state.elapsed,
            remaining: state.remaining(),
            mode: state.mode,
            preempted_from: state.preempted_from.clone(),
            preempt_approaches: state.preempt_approaches.clone(),
            fallback: state.fallback,
        }
    }
}

/// Serializes a duration as whole milliseconds.
pub(crate) fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ============================================================================
// Commits and Transitions
// ============================================================================

/// A correction applied to a decision before it was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    /// The decision named a phase the topology does not define
    UnknownPhase {
        /// Phase that was requested
        requested: PhaseId,
        /// Phase committed instead
        substituted: PhaseId,
    },
    /// The decision named a phase whose approaches conflict
    ConflictingPhase {
        /// Phase that was requested
        requested: PhaseId,
        /// Phase committed instead
        substituted: PhaseId,
    },
    /// The decision's duration was outside the phase's green bounds
    DurationClamped {
        /// Phase committed
        phase: PhaseId,
        /// Requested duration
        #[serde(rename = "requested_ms", serialize_with = "as_millis")]
        requested: Duration,
        /// Committed duration
        #[serde(rename = "committed_ms", serialize_with = "as_millis")]
        committed: Duration,
    },
}

impl Correction {
    /// Label used in metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownPhase { .. } => "unknown_phase",
            Self::ConflictingPhase { .. } => "conflicting_phase",
            Self::DurationClamped { .. } => "duration_clamped",
        }
    }
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPhase {
                requested,
                substituted,
            } => write!(f, "unknown phase '{requested}' replaced by '{substituted}'"),
            Self::ConflictingPhase {
                requested,
                substituted,
            } => write!(f, "conflicting phase '{requested}' replaced by '{substituted}'"),
            Self::DurationClamped {
                phase,
                requested,
                committed,
            } => write!(
                f,
                "green for '{phase}' clamped from {}ms to {}ms",
                requested.as_millis(),
                committed.as_millis()
            ),
        }
    }
}

/// A decision as it was committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Phase granted green
    pub phase: PhaseId,
    /// Committed green duration
    pub duration: Duration,
    /// Strategy that produced the decision
    pub strategy: ControlMode,
    /// Advisory confidence, if any
    pub confidence: Option<f64>,
    /// Fallback flag carried over from the decision
    pub fallback: Option<FallbackReason>,
    /// Corrections applied on the way in
    pub corrections: Vec<Correction>,
}

impl Commit {
    /// Returns `true` if the decision was altered before commit.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.corrections.is_empty()
    }
}

/// One sub-state change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Sub-state left
    pub from: SubState,
    /// Sub-state entered
    pub to: SubState,
    /// Phase after the transition
    pub phase: Option<PhaseId>,
    /// Commit, when the transition entered a fresh GREEN
    pub commit: Option<Commit>,
}

/// Progress of a preemption as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreemptionStage {
    /// No preemption
    Idle,
    /// Requested; waiting for the next legal boundary
    Requested,
    /// In PREEMPT_CLEAR
    Clearing,
    /// In PREEMPT_GREEN
    Green,
    /// Leaving preemptive green through yellow and recovery
    Releasing,
}
