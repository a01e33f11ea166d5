//! Prometheus metrics
//!
//! Label values are phase and approach identifiers from the loaded
//! topology, or members of closed enums, so cardinality is bounded by the
//! configuration. Identifiers are still truncated and scrubbed before use.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::GreenwaveError;
use crate::preempt::Resolution;
use crate::signal::SubState;
use crate::strategy::{ControlMode, FallbackReason};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Longest label value emitted.
const MAX_LABEL_LEN: usize = 64;

/// Installs the global recorder, with an HTTP listener on
/// `127.0.0.1:<port>` when `port` is given.
///
/// # Errors
///
/// Returns `GreenwaveError::Io` if the recorder or listener cannot be
/// installed.
pub fn init_metrics(port: Option<u16>) -> Result<(), GreenwaveError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| GreenwaveError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("greenwave_ticks_total", "Control loop ticks executed");
    describe_counter!(
        "greenwave_phase_commits_total",
        "Phases granted green, by phase and strategy"
    );
    describe_counter!(
        "greenwave_corrections_total",
        "Decisions corrected before commit, by kind"
    );
    describe_counter!(
        "greenwave_advisory_fallbacks_total",
        "Advisories not accepted, by reason"
    );
    describe_counter!("greenwave_mode_switches_total", "Strategy switches applied");
    describe_counter!("greenwave_preemptions_total", "Preemptions requested");
    describe_counter!(
        "greenwave_emergencies_resolved_total",
        "Emergency events resolved, by resolution"
    );
    describe_counter!(
        "greenwave_inputs_rejected_total",
        "Input records dropped, by kind"
    );
    describe_gauge!("greenwave_queue_length", "Vehicles waiting per approach");
    describe_gauge!(
        "greenwave_sub_state",
        "Current signal sub-state (0 green .. 5 preempt recovery)"
    );
}

/// Records one tick.
pub fn record_tick() {
    counter!("greenwave_ticks_total").increment(1);
}

/// Records a committed phase.
pub fn record_commit(phase: &str, strategy: ControlMode) {
    counter!(
        "greenwave_phase_commits_total",
        "phase" => sanitize_label(phase),
        "strategy" => strategy.as_str(),
    )
    .increment(1);
}

/// Records a correction applied to a decision.
pub fn record_correction(kind: &'static str) {
    counter!("greenwave_corrections_total", "kind" => kind).increment(1);
}

/// Records an advisory fallback.
pub fn record_fallback(reason: FallbackReason) {
    counter!("greenwave_advisory_fallbacks_total", "reason" => reason.as_str()).increment(1);
}

/// Records an applied mode switch.
pub fn record_mode_switch(to: ControlMode) {
    counter!("greenwave_mode_switches_total", "to" => to.as_str()).increment(1);
}

/// Records a preemption request.
pub fn record_preemption() {
    counter!("greenwave_preemptions_total").increment(1);
}

/// Records a resolved emergency event.
pub fn record_resolution(resolution: Resolution) {
    counter!(
        "greenwave_emergencies_resolved_total",
        "resolution" => resolution.as_str()
    )
    .increment(1);
}

/// Records a dropped input record.
pub fn record_rejected(kind: &'static str) {
    counter!("greenwave_inputs_rejected_total", "kind" => kind).increment(1);
}

/// Sets the queue gauge of one approach.
pub fn set_queue_length(approach: &str, queue: u32) {
    gauge!("greenwave_queue_length", "approach" => sanitize_label(approach))
        .set(f64::from(queue));
}

/// Sets the sub-state gauge.
pub fn set_sub_state(sub_state: SubState) {
    gauge!("greenwave_sub_state").set(f64::from(sub_state.code()));
}

/// Truncates an identifier and replaces characters Prometheus rejects.
fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .take(MAX_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("NE"), "NE");
        assert_eq!(sanitize_label("north east/1"), "north_east_1");
        assert_eq!(sanitize_label(&"x".repeat(100)).len(), MAX_LABEL_LEN);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_tick();
        record_commit("NS", ControlMode::Fixed);
        record_fallback(FallbackReason::Stale);
        set_queue_length("N", 12);
        set_sub_state(SubState::PreemptGreen);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics(None).is_ok());
        assert!(init_metrics(None).is_ok());
    }
}
