//! Strategy behaviour through the controller, using the YAML fixtures.

mod common;

use common::{advisory, controller, idle, manual, mode, step_until, telemetry};
use greenwave::Controller;
use greenwave::controller::StepReport;
use greenwave::signal::{Commit, Correction, SubState};
use greenwave::strategy::{ControlMode, FallbackReason};
use greenwave::topology::{ApproachId, PhaseId};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn next_commit(c: &mut Controller) -> (StepReport, Commit) {
    let (report, _) = step_until(c, 200, |r| r.commits().next().is_some());
    let commit = report.commits().next().cloned().unwrap();
    (report, commit)
}

/// Idles to the start of the next all-red, so a record sent on the
/// following tick is one second old at the boundary.
fn to_all_red(c: &mut Controller) {
    step_until(c, 200, |r| r.snapshot.sub_state == SubState::AllRed);
}

// ============================================================================
// Max-Pressure
// ============================================================================

#[test]
fn max_pressure_prefers_heavier_phase_then_rotates() {
    let mut c = controller("four_way.yaml", ControlMode::Heuristic);
    c.step(
        vec![
            telemetry("N", 20, 0),
            telemetry("S", 5, 0),
            telemetry("E", 15, 0),
            telemetry("W", 5, 0),
        ],
        common::TICK,
    );

    // NS pressure 25 beats EW 20, green extended past the 15s base
    let (_, first) = next_commit(&mut c);
    assert_eq!(first.phase, PhaseId::from("NS"));
    assert_eq!(first.duration, secs(35));
    assert!(first.duration > secs(15));

    // NS queues discharge while it is green
    c.step(vec![telemetry("N", 2, 1_000), telemetry("S", 1, 1_000)], common::TICK);
    let (_, second) = next_commit(&mut c);
    assert_eq!(second.phase, PhaseId::from("EW"));
    assert_eq!(second.strategy, ControlMode::Heuristic);
    // 15 base + min(20 vehicles, 20s cap)
    assert_eq!(second.duration, secs(35));
}

#[test]
fn max_pressure_tie_goes_to_lowest_phase_id() {
    let mut c = controller("four_way.yaml", ControlMode::Heuristic);
    let (_, commit) = next_commit(&mut c);
    assert_eq!(commit.phase, PhaseId::from("EW"));
    assert_eq!(commit.duration, secs(15));
}

#[test]
fn stale_telemetry_is_discarded() {
    let mut c = controller("four_way.yaml", ControlMode::Heuristic);
    c.step(vec![telemetry("N", 12, 5_000)], common::TICK);
    c.step(vec![telemetry("N", 3, 4_000)], common::TICK);
    let queues = c.snapshot().total_queue_by_approach;
    assert_eq!(queues.get(&ApproachId::from("N")), Some(&12));
}

// ============================================================================
// Adaptive Advisory
// ============================================================================

#[test]
fn fresh_confident_advisory_is_committed_verbatim() {
    let mut c = controller("four_way.yaml", ControlMode::Adaptive);
    next_commit(&mut c);
    to_all_red(&mut c);

    // threshold is inclusive
    c.step(vec![advisory("NS", 24.0, 0.7)], common::TICK);
    let (report, commit) = next_commit(&mut c);
    assert_eq!(commit.phase, PhaseId::from("NS"));
    assert_eq!(commit.duration, secs(24));
    assert_eq!(commit.confidence, Some(0.7));
    assert!(commit.fallback.is_none());
    assert!(!report.snapshot.used_fallback);
}

#[test]
fn advisory_rejections_fall_back_with_reason() {
    let cases = [
        (advisory("NS", 24.0, 0.4), FallbackReason::LowConfidence),
        (advisory("XX", 24.0, 0.9), FallbackReason::UnknownPhase),
        (advisory("NS", 90.0, 0.9), FallbackReason::DurationOutOfBounds),
        (advisory("NS", 5.0, 0.9), FallbackReason::DurationOutOfBounds),
    ];

    for (record, expected) in cases {
        let mut c = controller("four_way.yaml", ControlMode::Adaptive);
        next_commit(&mut c);
        to_all_red(&mut c);
        c.step(vec![record], common::TICK);

        let (report, commit) = next_commit(&mut c);
        assert_eq!(commit.fallback, Some(expected));
        assert_eq!(commit.strategy, ControlMode::Adaptive);
        assert!(report.snapshot.used_fallback);
        assert_eq!(report.snapshot.fallback_reason, Some(expected));
    }
}

#[test]
fn advisory_goes_stale_before_the_boundary() {
    let mut c = controller("four_way.yaml", ControlMode::Adaptive);
    let (_, first) = next_commit(&mut c);
    assert_eq!(first.fallback, Some(FallbackReason::Missing));

    // arrives at the start of a 15s green; max age is 5s
    c.step(vec![advisory("NS", 24.0, 0.95)], common::TICK);
    let (_, commit) = next_commit(&mut c);
    assert_eq!(commit.fallback, Some(FallbackReason::Stale));
}

// ============================================================================
// Manual Override and Mode Switching
// ============================================================================

#[test]
fn manual_unknown_phase_is_corrected_to_rotation() {
    let mut c = controller("five_way.yaml", ControlMode::Fixed);
    c.step(vec![manual("XX", 20.0)], common::TICK);

    let (report, commit) = next_commit(&mut c);
    assert_eq!(report.mode_switch, Some((ControlMode::Fixed, ControlMode::Manual)));
    assert_eq!(commit.phase, PhaseId::from("NS"));
    assert!(commit.is_degraded());
    assert!(
        commit
            .corrections
            .iter()
            .any(|c| matches!(c, Correction::UnknownPhase { .. }))
    );
}

#[test]
fn mode_switch_never_shortens_running_green() {
    let mut c = controller("five_way.yaml", ControlMode::Fixed);
    next_commit(&mut c);

    c.step(vec![mode(ControlMode::Heuristic)], common::TICK);
    // fixed green of 30s runs out in full before the switch applies
    for _ in 0..28 {
        let report = idle(&mut c);
        assert_eq!(report.snapshot.sub_state, SubState::Green);
        assert_eq!(report.snapshot.mode, ControlMode::Fixed);
        assert_eq!(report.snapshot.pending_mode, Some(ControlMode::Heuristic));
    }

    let (report, commit) = next_commit(&mut c);
    assert_eq!(commit.strategy, ControlMode::Heuristic);
    assert_eq!(report.snapshot.mode, ControlMode::Heuristic);
    assert!(report.snapshot.pending_mode.is_none());
}
