//! Max-pressure heuristic
//!
//! Scores every phase by the queue imbalance it would relieve and greens
//! the highest scorer. For each approach the phase releases, the score adds
//! the approach's queue and subtracts the queues of the approaches it
//! discharges into (when that downstream model is configured). Ties go to
//! the lexically lowest phase identifier, so identical queue states always
//! produce identical decisions.

use std::time::Duration;

use crate::config::schema::MaxPressureSettings;
use crate::controller::ApproachTable;
use crate::topology::{Phase, Topology};

use super::{ControlMode, Decision, StrategyView};

/// Max-pressure phase selection.
#[derive(Debug, Clone)]
pub struct MaxPressure {
    base_green: Duration,
    extension_per_vehicle: Duration,
    max_extension: Duration,
}

impl MaxPressure {
    /// Creates the heuristic from its settings.
    #[must_use]
    pub const fn new(settings: &MaxPressureSettings) -> Self {
        Self {
            base_green: settings.base_green.get(),
            extension_per_vehicle: settings.extension_per_vehicle.get(),
            max_extension: settings.max_extension.get(),
        }
    }

    /// Greens the phase with maximal pressure.
    pub fn decide(&self, view: &StrategyView<'_>) -> Decision {
        self.decide_tagged(view, ControlMode::Heuristic)
    }

    /// Same as [`MaxPressure::decide`] with a caller-supplied strategy tag,
    /// used when another strategy falls back to this one.
    pub(crate) fn decide_tagged(&self, view: &StrategyView<'_>, tag: ControlMode) -> Decision {
        let winner = view
            .topology
            .phases()
            .map(|phase| (phase, pressure(view.topology, view.approaches, phase)))
            .max_by(|(a, pa), (b, pb)| pa.cmp(pb).then_with(|| b.id.cmp(&a.id)));

        match winner {
            Some((phase, score)) => {
                let duration = phase.clamp_green(self.base_green + self.extension(score));
                Decision::new(phase.id.clone(), duration, tag)
            }
            None => Decision::new(crate::topology::PhaseId::new(""), self.base_green, tag),
        }
    }

    /// Extension proportional to the winning pressure, bounded.
    fn extension(&self, score: i64) -> Duration {
        let vehicles = u32::try_from(score.max(0)).unwrap_or(u32::MAX);
        self.extension_per_vehicle
            .saturating_mul(vehicles)
            .min(self.max_extension)
    }
}

/// Pressure score of one phase.
#[must_use]
pub fn pressure(topology: &Topology, approaches: &ApproachTable, phase: &Phase) -> i64 {
    phase
        .approaches
        .iter()
        .map(|id| {
            let upstream = i64::from(approaches.queue_length(id));
            let downstream: i64 = topology
                .approach(id)
                .map(|a| {
                    a.releases_into
                        .iter()
                        .map(|d| i64::from(approaches.queue_length(d)))
                        .sum()
                })
                .unwrap_or(0);
            upstream - downstream
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ConfigDuration;
    use crate::signal::SignalState;
    use crate::topology::fixtures::{four_way, four_way_config};
    use crate::topology::{ApproachId, PhaseId};

    fn settings() -> MaxPressureSettings {
        MaxPressureSettings {
            base_green: ConfigDuration::from_secs(15),
            extension_per_vehicle: ConfigDuration::from_secs(1),
            max_extension: ConfigDuration::from_secs(20),
        }
    }

    fn table(topo: &Topology, queues: &[(&str, u32)]) -> ApproachTable {
        let mut table = ApproachTable::from_topology(topo);
        for (id, q) in queues {
            table.set_queue(&ApproachId::from(*id), *q);
        }
        table
    }

    fn decide(topo: &Topology, table: &ApproachTable) -> Decision {
        let signal = SignalState::new(ControlMode::Heuristic, Duration::from_secs(2));
        let view = StrategyView {
            topology: topo,
            approaches: table,
            signal: &signal,
            advisory: None,
            now: Duration::ZERO,
        };
        MaxPressure::new(&settings()).decide(&view)
    }

    #[test]
    fn test_scenario_ns_wins_then_ew() {
        let topo = four_way();
        let queues = table(&topo, &[("N", 20), ("S", 5), ("E", 15), ("W", 5)]);
        let ns = topo.phase(&"NS".into()).unwrap();
        let ew = topo.phase(&"EW".into()).unwrap();
        assert_eq!(pressure(&topo, &queues, ns), 25);
        assert_eq!(pressure(&topo, &queues, ew), 20);

        let first = decide(&topo, &queues);
        assert_eq!(first.phase, PhaseId::from("NS"));
        assert!(first.duration > Duration::from_secs(15), "extended beyond base");
        assert_eq!(first.duration, Duration::from_secs(35));
        assert_eq!(first.strategy, ControlMode::Heuristic);

        // NS green discharges the north/south queues
        let after = table(&topo, &[("N", 2), ("S", 1), ("E", 15), ("W", 5)]);
        assert_eq!(decide(&topo, &after).phase, PhaseId::from("EW"));
    }

    #[test]
    fn test_tie_breaks_on_lowest_id() {
        let topo = four_way();
        let queues = table(&topo, &[("N", 5), ("S", 5), ("E", 5), ("W", 5)]);
        let decision = decide(&topo, &queues);
        assert_eq!(decision.phase, PhaseId::from("EW"));
    }

    #[test]
    fn test_deterministic() {
        let topo = four_way();
        let queues = table(&topo, &[("N", 7), ("S", 3), ("E", 9), ("W", 1)]);
        assert_eq!(decide(&topo, &queues), decide(&topo, &queues));
    }

    #[test]
    fn test_empty_queues_use_base_green() {
        let topo = four_way();
        let queues = ApproachTable::from_topology(&topo);
        let decision = decide(&topo, &queues);
        assert_eq!(decision.duration, Duration::from_secs(15));
    }

    #[test]
    fn test_downstream_queues_reduce_pressure() {
        let mut config = four_way_config();
        // N discharges into E
        config.approaches[0].releases_into = vec!["E".into()];
        let topo = Topology::from_config(&config).unwrap();
        let queues = table(&topo, &[("N", 20), ("S", 5), ("E", 15), ("W", 5)]);
        let ns = topo.phase(&"NS".into()).unwrap();
        assert_eq!(pressure(&topo, &queues, ns), 10);
        assert_eq!(decide(&topo, &queues).phase, PhaseId::from("EW"));
    }
}
