//! Shared integration-test helpers: fixture loading, record builders and a
//! runner for the built `greenwave` binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::Duration;

use greenwave::config::{ConfigLoader, LoadResult};
use greenwave::controller::{
    AdvisoryReport, ControlInput, Controller, EmergencyReport, ModeCommand, StepReport,
    TelemetryReport,
};
use greenwave::strategy::ControlMode;

/// Control tick used by every fixture.
pub const TICK: Duration = Duration::from_secs(1);

/// Absolute path of a file under `tests/fixtures/`.
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Loads a fixture configuration, panicking on any error.
pub fn load(name: &str) -> LoadResult {
    ConfigLoader::with_defaults()
        .load(&fixture(name))
        .unwrap_or_else(|e| panic!("fixture {name} failed to load: {e}"))
}

/// Builds a controller from a fixture, starting in `mode`.
pub fn controller(name: &str, mode: ControlMode) -> Controller {
    let loaded = load(name);
    let mut config = (*loaded.config).clone();
    config.control.initial_mode = mode;
    Controller::new(Arc::new(config), loaded.topology)
}

// ============================================================================
// Record Builders
// ============================================================================

pub fn telemetry(approach: &str, queue: u32, timestamp_ms: u64) -> ControlInput {
    ControlInput::Telemetry(TelemetryReport {
        approach_id: approach.into(),
        queue_length: queue,
        timestamp_ms,
    })
}

pub fn emergency(approach: &str, confidence: f64, active: bool) -> ControlInput {
    ControlInput::Emergency(EmergencyReport {
        approach_id: approach.into(),
        confidence,
        timestamp_ms: 0,
        active,
    })
}

pub fn mode(mode: ControlMode) -> ControlInput {
    ControlInput::Mode(ModeCommand {
        mode,
        manual_phase_id: None,
        manual_duration_sec: None,
    })
}

pub fn manual(phase: &str, duration_sec: f64) -> ControlInput {
    ControlInput::Mode(ModeCommand {
        mode: ControlMode::Manual,
        manual_phase_id: Some(phase.into()),
        manual_duration_sec: Some(duration_sec),
    })
}

pub fn advisory(phase: &str, duration_sec: f64, confidence: f64) -> ControlInput {
    ControlInput::Advisory(AdvisoryReport {
        phase_id: phase.into(),
        duration_sec,
        confidence,
    })
}

// ============================================================================
// Stepping
// ============================================================================

/// Steps one tick with no input.
pub fn idle(c: &mut Controller) -> StepReport {
    c.step(Vec::new(), TICK)
}

/// Steps idle ticks until `done` holds, returning the matching report and
/// the number of ticks taken. Panics after `limit` ticks.
pub fn step_until(
    c: &mut Controller,
    limit: u32,
    mut done: impl FnMut(&StepReport) -> bool,
) -> (StepReport, u32) {
    for n in 1..=limit {
        let report = idle(c);
        if done(&report) {
            return (report, n);
        }
    }
    panic!("condition not reached within {limit} ticks");
}

// ============================================================================
// Binary Runner
// ============================================================================

/// Runs the built binary with `args` and waits for it to exit.
pub fn greenwave(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_greenwave"))
        .args(args)
        .env_remove("GREENWAVE_LOG_LEVEL")
        .output()
        .expect("failed to spawn greenwave")
}
