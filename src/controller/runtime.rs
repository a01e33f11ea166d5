//! Async control loop
//!
//! Drives a [`Controller`] on a fixed `tokio::time::interval`. Producers
//! feed the loop through an [`InboxSender`](super::InboxSender); readers
//! follow published [`StateSnapshot`]s on a `watch` channel, so a slow
//! reader never delays a tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::observability::metrics;
use crate::observability::{Event, EventEmitter, RunSummary, StopReason};
use crate::preempt::PreemptionUpdate;

use super::arbitrator::{Controller, StateSnapshot, StepReport};
use super::inbox::Inbox;

// ============================================================================
// Step Publication
// ============================================================================

/// Turns one step report into audit events and metrics, and folds it into
/// the run totals.
pub fn publish_step(report: &StepReport, emitter: &EventEmitter, summary: &mut RunSummary) {
    let tick = report.snapshot.tick;
    summary.ticks += 1;
    metrics::record_tick();

    for rejection in &report.rejected {
        summary.rejected_inputs += 1;
        metrics::record_rejected(rejection.kind);
        emitter.emit(Event::InputRejected {
            timestamp: Utc::now(),
            kind: rejection.kind.to_owned(),
            reason: rejection.reason.clone(),
        });
    }

    if let Some((from, to)) = report.mode_switch {
        metrics::record_mode_switch(to);
        emitter.emit(Event::ModeSwitched {
            timestamp: Utc::now(),
            tick,
            from,
            to,
        });
    }

    for commit in report.commits() {
        summary.commits += 1;
        metrics::record_commit(commit.phase.as_str(), commit.strategy);
        emitter.emit(Event::PhaseCommitted {
            timestamp: Utc::now(),
            tick,
            phase: commit.phase.clone(),
            duration_secs: commit.duration.as_secs_f64(),
            strategy: commit.strategy,
            confidence: commit.confidence,
        });

        if let Some(reason) = commit.fallback {
            metrics::record_fallback(reason);
            emitter.emit(Event::AdvisoryFallback {
                timestamp: Utc::now(),
                tick,
                reason,
                phase: commit.phase.clone(),
            });
        }

        if commit.is_degraded() {
            summary.corrections += 1;
            for correction in &commit.corrections {
                metrics::record_correction(correction.kind());
            }
            emitter.emit(Event::DegradedDecision {
                timestamp: Utc::now(),
                tick,
                strategy: commit.strategy,
                corrections: commit.corrections.clone(),
            });
        }
    }

    for update in &report.preemption {
        match update {
            PreemptionUpdate::Started { approaches, .. } => {
                summary.preemptions += 1;
                metrics::record_preemption();
                emitter.emit(Event::PreemptionStarted {
                    timestamp: Utc::now(),
                    tick,
                    approaches: approaches.iter().cloned().collect(),
                });
            }
            PreemptionUpdate::ServedInPhase { phase, approach } => {
                emitter.emit(Event::EmergencyServedInPhase {
                    timestamp: Utc::now(),
                    tick,
                    phase: phase.clone(),
                    approach: approach.clone(),
                });
            }
            PreemptionUpdate::Resolved(event) => {
                if let Some(resolution) = event.resolution {
                    metrics::record_resolution(resolution);
                }
                emitter.emit(Event::EmergencyResolved {
                    timestamp: Utc::now(),
                    tick,
                    event: event.clone(),
                });
            }
            PreemptionUpdate::Merged { .. }
            | PreemptionUpdate::Extended { .. }
            | PreemptionUpdate::Released => {}
        }
    }

    for (approach, queue) in &report.snapshot.total_queue_by_approach {
        metrics::set_queue_length(approach.as_str(), *queue);
    }
    metrics::set_sub_state(report.snapshot.sub_state);
}

// ============================================================================
// Control Loop
// ============================================================================

/// Periodic driver around a [`Controller`].
#[derive(Debug)]
pub struct ControlLoop {
    controller: Controller,
    inbox: Inbox,
    period: Duration,
    emitter: Arc<EventEmitter>,
    snapshots: watch::Sender<Arc<StateSnapshot>>,
    stop_when_inputs_close: bool,
}

impl ControlLoop {
    /// Creates a loop ticking at the configured period.
    ///
    /// Returns the loop and a receiver that always holds the latest snapshot.
    #[must_use]
    pub fn new(
        controller: Controller,
        inbox: Inbox,
        emitter: Arc<EventEmitter>,
    ) -> (Self, watch::Receiver<Arc<StateSnapshot>>) {
        let period = controller.config().control.tick.get();
        let (snapshots, rx) = watch::channel(Arc::new(controller.snapshot()));
        let control_loop = Self {
            controller,
            inbox,
            period,
            emitter,
            snapshots,
            stop_when_inputs_close: false,
        };
        (control_loop, rx)
    }

    /// Stops the loop once every producer has gone and the inbox is empty.
    #[must_use]
    pub fn stop_when_inputs_close(mut self, stop: bool) -> Self {
        self.stop_when_inputs_close = stop;
        self
    }

    /// Runs until cancelled, returning the run totals.
    ///
    /// A cancelled token reports [`StopReason::Interrupted`]; exhausted
    /// inputs report [`StopReason::Completed`].
    pub async fn run(mut self, cancel: CancellationToken) -> RunSummary {
        self.emitter.emit(Event::ControllerStarted {
            timestamp: Utc::now(),
            intersection: self.controller.topology().id().to_owned(),
            mode: self.controller.mode(),
        });
        info!(
            intersection = self.controller.topology().id(),
            tick_ms = self.period.as_millis(),
            "control loop started"
        );

        let mut summary = RunSummary::default();
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;

        let reason = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("control loop cancelled");
                    break StopReason::Interrupted;
                }
                _ = interval.tick() => {
                    let inputs = self.inbox.drain();
                    let report = self.controller.step(inputs, self.period);
                    publish_step(&report, &self.emitter, &mut summary);
                    self.snapshots.send_replace(Arc::new(report.snapshot));

                    if self.stop_when_inputs_close && self.inbox.is_closed() {
                        debug!("inputs closed, stopping control loop");
                        break StopReason::Completed;
                    }
                }
            }
        };

        summary.uptime_secs = self.controller.clock().as_secs_f64();
        info!(summary = %summary, "control loop stopped");
        self.emitter.emit(Event::ControllerStopped {
            timestamp: Utc::now(),
            reason,
            summary: Some(summary.clone()),
        });
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::inbox::{ControlInput, TelemetryReport, inbox};
    use crate::topology::{ApproachId, Topology};
    use crate::topology::fixtures::four_way_config;

    fn controller() -> Controller {
        let config = four_way_config();
        let topology = Arc::new(Topology::from_config(&config).unwrap());
        Controller::new(Arc::new(config), topology)
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_publishes_snapshots() {
        let (tx, rx) = inbox(16);
        let (control_loop, mut snapshots) =
            ControlLoop::new(controller(), rx, Arc::new(EventEmitter::noop()));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(control_loop.run(cancel.clone()));

        tx.submit(ControlInput::Telemetry(TelemetryReport {
            approach_id: "N".into(),
            queue_length: 9,
            timestamp_ms: 0,
        }))
        .await
        .unwrap();

        snapshots.changed().await.unwrap();
        let latest = Arc::clone(&snapshots.borrow_and_update());
        assert_eq!(latest.tick, 1);
        assert_eq!(latest.total_queue_by_approach.get(&ApproachId::from("N")), Some(&9));

        cancel.cancel();
        let summary = handle.await.unwrap();
        assert!(summary.ticks >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_when_inputs_close() {
        let (tx, rx) = inbox(4);
        let (control_loop, _snapshots) =
            ControlLoop::new(controller(), rx, Arc::new(EventEmitter::noop()));
        drop(tx);
        let summary = control_loop
            .stop_when_inputs_close(true)
            .run(CancellationToken::new())
            .await;
        assert_eq!(summary.ticks, 1);
        assert!((summary.uptime_secs - 1.0).abs() < 1e-9);
    }
}
