//! Fixed-timer strategy
//!
//! Walks the default rotation with a constant green. Ignores queue state.
//! This is the ultimate fallback: the state machine substitutes its choice
//! whenever another strategy names an unusable phase.

use std::time::Duration;

use crate::config::schema::FixedSettings;
use crate::signal::SignalState;
use crate::topology::{PhaseId, Topology};

use super::{ControlMode, Decision, StrategyView};

/// Fixed rotation with a configured green duration.
#[derive(Debug, Clone)]
pub struct FixedTimer {
    green: Duration,
}

impl FixedTimer {
    /// Creates a fixed timer from its settings.
    #[must_use]
    pub const fn new(settings: &FixedSettings) -> Self {
        Self {
            green: settings.green.get(),
        }
    }

    /// Configured green duration.
    #[must_use]
    pub const fn green(&self) -> Duration {
        self.green
    }

    /// Returns the next phase in rotation order.
    pub fn decide(&self, view: &StrategyView<'_>) -> Decision {
        let phase = next_in_cycle(view.topology, view.signal)
            .cloned()
            .unwrap_or_else(|| first_phase(view.topology));
        Decision::new(phase, self.green, ControlMode::Fixed)
    }
}

/// Phase following the current rotation position.
#[must_use]
pub fn next_in_cycle<'a>(topology: &'a Topology, signal: &SignalState) -> Option<&'a PhaseId> {
    let cycle = topology.cycle();
    cycle.get(cycle.next_position(signal.cycle_position))
}

fn first_phase(topology: &Topology) -> PhaseId {
    topology
        .phases()
        .next()
        .map(|p| p.id.clone())
        .unwrap_or_else(|| PhaseId::new(""))
}
