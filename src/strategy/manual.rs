//! Operator control
//!
//! An operator command is consumed by the first boundary after it is
//! queued. Without a pending command the previously committed phase is held
//! for its minimum green, so the intersection keeps cycling through its
//! clearance intervals while waiting for the next instruction.

use std::time::Duration;

use super::{ControlMode, Decision, FixedTimer, StrategyView};

/// An operator-supplied phase and optional duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualCommand {
    /// Phase to green
    pub phase: crate::topology::PhaseId,
    /// Green duration; the fixed-timer green when absent
    pub duration: Option<Duration>,
}

/// Manual strategy state.
#[derive(Debug, Clone)]
pub struct ManualControl {
    pending: Option<ManualCommand>,
    default: FixedTimer,
}

impl ManualControl {
    /// Creates manual control with no pending command.
    #[must_use]
    pub const fn new(default: FixedTimer) -> Self {
        Self {
            pending: None,
            default,
        }
    }

    /// Queues a command, replacing any command not yet consumed.
    pub fn queue(&mut self, command: ManualCommand) {
        self.pending = Some(command);
    }

    /// Returns the pending command, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<&ManualCommand> {
        self.pending.as_ref()
    }

    /// Consumes the pending command or holds the previous phase.
    pub fn decide(&mut self, view: &StrategyView<'_>) -> Decision {
        if let Some(command) = self.pending.take() {
            let duration = command.duration.unwrap_or_else(|| self.default.green());
            return Decision::new(command.phase, duration, ControlMode::Manual);
        }

        let held = view
            .signal
            .phase
            .as_ref()
            .and_then(|id| view.topology.phase(id));
        match held {
            Some(phase) => Decision::new(phase.id.clone(), phase.min_green, ControlMode::Manual),
            None => {
                let mut decision = self.default.decide(view);
                decision.strategy = ControlMode::Manual;
                decision
            }
        }
    }
}
