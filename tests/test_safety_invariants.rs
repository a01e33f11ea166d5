//! Property tests: whatever the inputs, conflicting approaches never move
//! together and no clearance interval is ever shortened.

mod common;

use std::time::Duration;

use greenwave::Controller;
use greenwave::controller::{ControlInput, StepReport};
use greenwave::signal::{SignalState, SubState};
use greenwave::strategy::ControlMode;
use greenwave::topology::Topology;
use proptest::prelude::*;

const APPROACHES: [&str; 6] = ["N", "S", "E", "W", "NE", "SW"];
const PHASES: [&str; 4] = ["NS", "NE", "EW", "XX"];
const MODES: [ControlMode; 4] = [
    ControlMode::Fixed,
    ControlMode::Heuristic,
    ControlMode::Adaptive,
    ControlMode::Manual,
];

#[derive(Debug, Clone)]
enum Op {
    Telemetry { approach: usize, queue: u32 },
    Emergency { approach: usize, confidence: f64, active: bool },
    Mode { mode: usize, phase: Option<usize>, duration: Option<f64> },
    Advisory { phase: usize, duration: f64, confidence: f64 },
    Wait { ticks: u32 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..APPROACHES.len(), 0u32..40)
            .prop_map(|(approach, queue)| Op::Telemetry { approach, queue }),
        1 => (0..APPROACHES.len(), 0.0f64..=1.0, any::<bool>())
            .prop_map(|(approach, confidence, active)| Op::Emergency { approach, confidence, active }),
        1 => (
            0..MODES.len(),
            proptest::option::of(0..PHASES.len()),
            proptest::option::of(0.0f64..120.0),
        )
            .prop_map(|(mode, phase, duration)| Op::Mode { mode, phase, duration }),
        2 => (0..PHASES.len(), 0.0f64..120.0, 0.0f64..=1.0)
            .prop_map(|(phase, duration, confidence)| Op::Advisory { phase, duration, confidence }),
        4 => (1u32..40).prop_map(|ticks| Op::Wait { ticks }),
    ]
}

/// Turns an op into the record it submits, or `None` for a pure wait.
fn record(op: &Op, timestamp_ms: u64) -> Option<ControlInput> {
    match *op {
        Op::Telemetry { approach, queue } => {
            Some(common::telemetry(APPROACHES[approach], queue, timestamp_ms))
        }
        Op::Emergency { approach, confidence, active } => {
            Some(common::emergency(APPROACHES[approach], confidence, active))
        }
        Op::Mode { mode, phase, duration } => {
            Some(ControlInput::Mode(greenwave::controller::ModeCommand {
                mode: MODES[mode],
                manual_phase_id: phase.map(|p| PHASES[p].into()),
                manual_duration_sec: duration,
            }))
        }
        Op::Advisory { phase, duration, confidence } => {
            Some(common::advisory(PHASES[phase], duration, confidence))
        }
        Op::Wait { .. } => None,
    }
}

/// Shortest duration a mandatory interval may be given.
fn clearance_floor(topology: &Topology, state: &SignalState) -> Duration {
    let phase = state.phase.as_ref().and_then(|id| topology.phase(id));
    let min_all_red = topology
        .phases()
        .map(|p| p.all_red)
        .min()
        .unwrap_or_default();
    match state.sub_state {
        SubState::Yellow => phase.map_or_else(|| topology.max_yellow(), |p| p.yellow),
        SubState::AllRed => phase.map_or_else(|| topology.max_all_red(), |p| p.all_red),
        SubState::PreemptClear => min_all_red,
        SubState::PreemptRecovery => topology.max_all_red(),
        SubState::Green | SubState::PreemptGreen => Duration::ZERO,
    }
}

fn check(c: &Controller, report: &StepReport) -> Result<(), TestCaseError> {
    let topology = c.topology();
    let state = c.machine().state();

    let moving = c.machine().moving_approaches();
    prop_assert!(
        topology.is_conflict_free(&moving),
        "conflicting approaches moving together: {moving:?}"
    );

    prop_assert!(state.elapsed <= state.required);
    prop_assert!(
        state.required >= clearance_floor(topology, state),
        "{} given {:?}",
        state.sub_state,
        state.required
    );

    for t in &report.transitions {
        match t.to {
            SubState::Green => prop_assert!(
                matches!(t.from, SubState::AllRed | SubState::PreemptRecovery),
                "green entered from {}",
                t.from
            ),
            SubState::PreemptGreen => prop_assert_eq!(t.from, SubState::PreemptClear),
            _ => {}
        }
        if matches!(t.from, SubState::Green | SubState::PreemptGreen) {
            prop_assert_eq!(t.to, SubState::Yellow);
        }
        if let Some(commit) = &t.commit {
            let phase = topology.phase(&commit.phase);
            prop_assert!(phase.is_some(), "unknown phase {} committed", commit.phase);
            if let Some(phase) = phase {
                prop_assert!(commit.duration >= phase.min_green);
                prop_assert!(commit.duration <= phase.max_green);
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn signal_stays_safe_under_arbitrary_inputs(ops in prop::collection::vec(op(), 1..60)) {
        let mut c = common::controller("five_way.yaml", ControlMode::Fixed);
        let mut clock_ms = 0u64;

        for op in &ops {
            let ticks = match op {
                Op::Wait { ticks } => *ticks,
                _ => 1,
            };
            let mut inputs: Vec<ControlInput> = record(op, clock_ms).into_iter().collect();
            for _ in 0..ticks {
                let report = c.step(std::mem::take(&mut inputs), common::TICK);
                clock_ms += 1_000;
                check(&c, &report)?;
            }
        }
    }

    #[test]
    fn snapshot_matches_live_state(ops in prop::collection::vec(op(), 1..30)) {
        let mut c = common::controller("five_way.yaml", ControlMode::Heuristic);
        for (i, op) in ops.iter().enumerate() {
            let inputs: Vec<ControlInput> = record(op, i as u64 * 1_000).into_iter().collect();
            let report = c.step(inputs, common::TICK);
            let state = c.machine().state();
            prop_assert_eq!(report.snapshot.sub_state, state.sub_state);
            prop_assert_eq!(&report.snapshot.phase_id, &state.phase);
            prop_assert_eq!(report.snapshot.tick, c.ticks());
            prop_assert_eq!(
                report.snapshot.emergency_active,
                !report.snapshot.emergency_approach_ids.is_empty()
            );
        }
    }
}
