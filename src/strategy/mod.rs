//! Control strategies
//!
//! Each strategy turns a read-only view of the intersection into a
//! [`Decision`]: which phase to green next and for how long. Exactly four
//! strategies exist and they are dispatched through the closed [`Strategy`]
//! enum. None of them enforces timing bounds; the phase state machine clamps
//! every decision identically, whichever strategy produced it.

pub mod adaptive;
pub mod fixed;
pub mod manual;
pub mod pressure;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::schema::StrategySettings;
use crate::controller::ApproachTable;
use crate::signal::SignalState;
use crate::topology::{PhaseId, Topology};

pub use adaptive::AdaptiveAdvisory;
pub use fixed::FixedTimer;
pub use manual::{ManualCommand, ManualControl};
pub use pressure::MaxPressure;

// ============================================================================
// Modes and Decisions
// ============================================================================

/// Which strategy drives normal operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Fixed rotation with a constant green
    #[default]
    Fixed,
    /// Max-pressure queue heuristic
    #[serde(alias = "max_pressure")]
    Heuristic,
    /// External advisory with local safety arbitration
    #[serde(alias = "rl")]
    Adaptive,
    /// Operator-supplied phase and duration
    Manual,
}

impl ControlMode {
    /// Lowercase name used in logs, metrics and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Heuristic => "heuristic",
            Self::Adaptive => "adaptive",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an advisory was not accepted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No advisory has been received
    Missing,
    /// The latest advisory is older than the configured maximum age
    Stale,
    /// Advisory confidence is below the configured threshold
    LowConfidence,
    /// Advisory names a phase the topology does not define
    UnknownPhase,
    /// Advisory duration lies outside the phase's green bounds
    DurationOutOfBounds,
}

impl FallbackReason {
    /// Label used in metrics and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Stale => "stale",
            Self::LowConfidence => "low_confidence",
            Self::UnknownPhase => "unknown_phase",
            Self::DurationOutOfBounds => "duration_out_of_bounds",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed next green. Produced once per boundary and consumed at once.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Proposed phase
    pub phase: PhaseId,
    /// Proposed green duration (unclamped)
    pub duration: Duration,
    /// Strategy that produced the decision
    pub strategy: ControlMode,
    /// Advisory confidence, when the decision came from an advisory
    pub confidence: Option<f64>,
    /// Set when the adaptive strategy fell back to max-pressure
    pub fallback: Option<FallbackReason>,
}

impl Decision {
    /// Creates a decision with no confidence and no fallback.
    #[must_use]
    pub const fn new(phase: PhaseId, duration: Duration, strategy: ControlMode) -> Self {
        Self {
            phase,
            duration,
            strategy,
            confidence: None,
            fallback: None,
        }
    }

    /// Returns `true` if the decision is a fallback rather than the
    /// strategy's primary output.
    #[must_use]
    pub const fn used_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// The latest advisory from the external policy module.
#[derive(Debug, Clone, PartialEq)]
pub struct Advisory {
    /// Suggested phase
    pub phase: PhaseId,
    /// Suggested green duration
    pub duration: Duration,
    /// Policy confidence in `[0, 1]`
    pub confidence: f64,
    /// Controller clock reading when the advisory was drained
    pub received_at: Duration,
}

// ============================================================================
// Strategy View
// ============================================================================

/// Read-only inputs available to a strategy at a decision boundary.
#[derive(Debug, Clone, Copy)]
pub struct StrategyView<'a> {
    /// Intersection topology
    pub topology: &'a Topology,
    /// Per-approach queue state
    pub approaches: &'a ApproachTable,
    /// Signal state at the boundary
    pub signal: &'a SignalState,
    /// Latest buffered advisory, if any
    pub advisory: Option<&'a Advisory>,
    /// Controller clock
    pub now: Duration,
}

// ============================================================================
// Strategy
// ============================================================================

/// The active control strategy.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Fixed rotation
    Fixed(FixedTimer),
    /// Max-pressure heuristic
    Heuristic(MaxPressure),
    /// Advisory with max-pressure fallback
    Adaptive(AdaptiveAdvisory),
    /// Operator control
    Manual(ManualControl),
}

impl Strategy {
    /// Builds the strategy for `mode` from its tuning.
    #[must_use]
    pub fn new(mode: ControlMode, settings: &StrategySettings) -> Self {
        match mode {
            ControlMode::Fixed => Self::Fixed(FixedTimer::new(&settings.fixed)),
            ControlMode::Heuristic => Self::Heuristic(MaxPressure::new(&settings.max_pressure)),
            ControlMode::Adaptive => Self::Adaptive(AdaptiveAdvisory::new(
                &settings.adaptive,
                MaxPressure::new(&settings.max_pressure),
            )),
            ControlMode::Manual => Self::Manual(ManualControl::new(FixedTimer::new(&settings.fixed))),
        }
    }

    /// Mode tag of this strategy.
    #[must_use]
    pub const fn mode(&self) -> ControlMode {
        match self {
            Self::Fixed(_) => ControlMode::Fixed,
            Self::Heuristic(_) => ControlMode::Heuristic,
            Self::Adaptive(_) => ControlMode::Adaptive,
            Self::Manual(_) => ControlMode::Manual,
        }
    }

    /// Produces the next decision.
    pub fn decide(&mut self, view: &StrategyView<'_>) -> Decision {
        match self {
            Self::Fixed(s) => s.decide(view),
            Self::Heuristic(s) => s.decide(view),
            Self::Adaptive(s) => s.decide(view),
            Self::Manual(s) => s.decide(view),
        }
    }

    /// Returns the manual controller when in manual mode.
    pub const fn as_manual_mut(&mut self) -> Option<&mut ManualControl> {
        match self {
            Self::Manual(m) => Some(m),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(serde_json::to_string(&ControlMode::Heuristic).unwrap(), "\"heuristic\"");
        let mode: ControlMode = serde_json::from_str("\"max_pressure\"").unwrap();
        assert_eq!(mode, ControlMode::Heuristic);
        let mode: ControlMode = serde_json::from_str("\"adaptive\"").unwrap();
        assert_eq!(mode, ControlMode::Adaptive);
        assert!(serde_json::from_str::<ControlMode>("\"chaos\"").is_err());
    }

    #[test]
    fn test_strategy_mode_tags() {
        let settings = StrategySettings::default();
        for mode in [
            ControlMode::Fixed,
            ControlMode::Heuristic,
            ControlMode::Adaptive,
            ControlMode::Manual,
        ] {
            assert_eq!(Strategy::new(mode, &settings).mode(), mode);
        }
    }

    #[test]
    fn test_fallback_labels() {
        assert_eq!(FallbackReason::LowConfidence.to_string(), "low_confidence");
        assert_eq!(
            serde_json::to_string(&FallbackReason::DurationOutOfBounds).unwrap(),
            "\"duration_out_of_bounds\""
        );
    }
}
