//! `simulate` command
//!
//! Replays a record file in virtual time. Each tick advances the controller
//! clock by exactly the configured period, so the same file and
//! configuration always produce the same snapshot stream.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::args::SimulateArgs;
use crate::controller::{Controller, publish_step};
use crate::error::GreenwaveError;
use crate::feed::{Schedule, SnapshotWriter};
use crate::observability::{Event, EventEmitter, RunSummary, StopReason};

use super::load_config;

/// Runs the replay and writes one snapshot per tick to stdout.
///
/// # Errors
///
/// Returns an error if the configuration or record file cannot be loaded,
/// or stdout cannot be written.
pub async fn run(args: &SimulateArgs, cancel: CancellationToken) -> Result<(), GreenwaveError> {
    let loaded = load_config(&args.config)?;

    let mut schedule = match args.input {
        Some(ref path) => Schedule::parse(&std::fs::read_to_string(path)?)?,
        None => Schedule::default(),
    };
    let ticks = args.ticks.or_else(|| schedule.last_tick()).unwrap_or(0);
    info!(records = schedule.len(), ticks, "replay loaded");

    let emitter = match args.events_file {
        Some(ref path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    };

    let period = loaded.config.control.tick.get();
    let mut controller = Controller::new(loaded.config, loaded.topology);
    let mut writer = SnapshotWriter::new(tokio::io::stdout());
    let mut summary = RunSummary::default();

    emitter.emit(Event::ControllerStarted {
        timestamp: Utc::now(),
        intersection: controller.topology().id().to_owned(),
        mode: controller.mode(),
    });

    let mut reason = StopReason::Completed;
    for tick in 1..=ticks {
        if cancel.is_cancelled() {
            reason = StopReason::Interrupted;
            break;
        }
        let report = controller.step(schedule.take(tick), period);
        publish_step(&report, &emitter, &mut summary);
        writer.write(&report.snapshot).await?;
    }

    if let Some(last) = schedule.last_tick() {
        warn!(last_tick = last, ticks, "records scheduled after the final tick were not replayed");
    }

    summary.uptime_secs = controller.clock().as_secs_f64();
    emitter.emit(Event::ControllerStopped {
        timestamp: Utc::now(),
        reason,
        summary: Some(summary.clone()),
    });
    info!(summary = %summary, "replay finished");
    Ok(())
}
