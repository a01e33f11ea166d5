//! Per-tick arbitration
//!
//! [`Controller`] is the single writer of everything that changes at run
//! time. Each [`Controller::step`] applies the inputs drained for the tick,
//! lets the preemption supervisor act, advances the phase state machine
//! (which consults the active strategy only when a fresh green starts) and
//! returns a [`StepReport`] with the published [`StateSnapshot`].
//!
//! The controller is synchronous and deterministic: given the same inputs
//! and elapsed times it produces the same snapshots, which is what lets the
//! simulator replay a feed in virtual time.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::schema::ControllerConfig;
use crate::preempt::{EmergencyOutcome, PreemptionPolicy, PreemptionSupervisor, PreemptionUpdate};
use crate::signal::{
    Commit, PhaseStateMachine, PreemptTiming, PreemptedFrom, SignalState, SubState, Transition,
};
use crate::strategy::{
    Advisory, ControlMode, FallbackReason, ManualCommand, Strategy, StrategyView,
};
use crate::topology::{ApproachId, PhaseId, Topology};

use super::approaches::{ApproachTable, TelemetryOutcome};
use super::inbox::{AdvisoryReport, ControlInput, ModeCommand};

// ============================================================================
// Reports
// ============================================================================

/// State published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Controller clock (ms)
    pub clock_ms: u64,
    /// Current phase, or the last one served
    pub phase_id: Option<PhaseId>,
    /// Current sub-state
    pub sub_state: SubState,
    /// Seconds left in the sub-state
    pub remaining_sec: f64,
    /// Active strategy
    pub mode: ControlMode,
    /// Strategy waiting for the next boundary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_mode: Option<ControlMode>,
    /// The current green came from a fallback
    pub used_fallback: bool,
    /// Why the fallback was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    /// A preemption is serving an emergency
    pub emergency_active: bool,
    /// First approach being served
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_approach_id: Option<ApproachId>,
    /// Every approach being served
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emergency_approach_ids: Vec<ApproachId>,
    /// Approaches whose emergencies wait for the current preemption
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queued_emergencies: Vec<ApproachId>,
    /// Normal operation the current preemption interrupted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preempted_from: Option<PreemptedFrom>,
    /// Queue length per approach
    pub total_queue_by_approach: IndexMap<ApproachId, u32>,
}

/// An input record that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedInput {
    /// Record kind
    pub kind: &'static str,
    /// Why it was dropped
    pub reason: String,
}

/// Everything that happened during one tick.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// State after the tick
    pub snapshot: StateSnapshot,
    /// Sub-state changes, in order
    pub transitions: Vec<Transition>,
    /// Supervisor actions
    pub preemption: Vec<PreemptionUpdate>,
    /// Inputs dropped
    pub rejected: Vec<RejectedInput>,
    /// Strategy switch applied at a boundary, as `(from, to)`
    pub mode_switch: Option<(ControlMode, ControlMode)>,
}

impl StepReport {
    /// Commits made during the tick.
    pub fn commits(&self) -> impl Iterator<Item = &Commit> {
        self.transitions.iter().filter_map(|t| t.commit.as_ref())
    }
}

// ============================================================================
// Controller
// ============================================================================

/// A strategy switch waiting for the next boundary.
#[derive(Debug, Clone, PartialEq)]
struct PendingSwitch {
    mode: ControlMode,
    command: Option<ManualCommand>,
}

/// Deterministic per-tick arbitrator.
#[derive(Debug)]
pub struct Controller {
    config: Arc<ControllerConfig>,
    topology: Arc<Topology>,
    machine: PhaseStateMachine,
    approaches: ApproachTable,
    supervisor: PreemptionSupervisor,
    strategy: Strategy,
    pending: Option<PendingSwitch>,
    advisory: Option<Advisory>,
    clock: Duration,
    ticks: u64,
}

impl Controller {
    /// Creates a controller in initial ALL_RED with the configured mode.
    #[must_use]
    pub fn new(config: Arc<ControllerConfig>, topology: Arc<Topology>) -> Self {
        let mode = config.control.initial_mode;
        let machine = PhaseStateMachine::new(
            Arc::clone(&topology),
            PreemptTiming::from(&config.emergency),
            mode,
        );
        let approaches = ApproachTable::from_topology(&topology);
        let supervisor = PreemptionSupervisor::new(PreemptionPolicy::from(&config.emergency));
        let strategy = Strategy::new(mode, &config.strategies);

        Self {
            config,
            topology,
            machine,
            approaches,
            supervisor,
            strategy,
            pending: None,
            advisory: None,
            clock: Duration::ZERO,
            ticks: 0,
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Intersection topology.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The phase state machine, read-only.
    #[must_use]
    pub const fn machine(&self) -> &PhaseStateMachine {
        &self.machine
    }

    /// Live approach state.
    #[must_use]
    pub const fn approaches(&self) -> &ApproachTable {
        &self.approaches
    }

    /// The preemption supervisor, read-only.
    #[must_use]
    pub const fn supervisor(&self) -> &PreemptionSupervisor {
        &self.supervisor
    }

    /// Active strategy mode.
    #[must_use]
    pub const fn mode(&self) -> ControlMode {
        self.strategy.mode()
    }

    /// Controller clock.
    #[must_use]
    pub const fn clock(&self) -> Duration {
        self.clock
    }

    /// Ticks executed.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// Applies `inputs`, then advances the signal by `elapsed`.
    pub fn step<I>(&mut self, inputs: I, elapsed: Duration) -> StepReport
    where
        I: IntoIterator<Item = ControlInput>,
    {
        let now = self.clock;

        let mut rejected = Vec::new();
        for input in inputs {
            if let Err(rejection) = self.apply(input, now) {
                warn!(kind = rejection.kind, reason = %rejection.reason, "input rejected");
                rejected.push(rejection);
            }
        }

        let preemption =
            self.supervisor
                .supervise(&mut self.machine, &mut self.approaches, now, elapsed);

        let mut mode_switch = None;
        let Self {
            config,
            topology,
            machine,
            approaches,
            strategy,
            pending,
            advisory,
            ..
        } = self;
        let topology: &Topology = topology;
        let approaches: &ApproachTable = approaches;
        let settings = &config.strategies;
        let transitions = machine.tick(elapsed, |signal: &SignalState| {
            if let Some(switch) = pending.take() {
                let from = strategy.mode();
                *strategy = Strategy::new(switch.mode, settings);
                if let (Some(command), Some(manual)) = (switch.command, strategy.as_manual_mut()) {
                    manual.queue(command);
                }
                info!(from = %from, to = %switch.mode, "control mode switched");
                mode_switch = Some((from, switch.mode));
            }
            let view = StrategyView {
                topology,
                approaches,
                signal,
                advisory: advisory.as_ref(),
                now,
            };
            strategy.decide(&view)
        });

        self.clock += elapsed;
        self.ticks += 1;

        StepReport {
            snapshot: self.snapshot(),
            transitions,
            preemption,
            rejected,
            mode_switch,
        }
    }

    /// Builds the snapshot for the current state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.machine.state();
        let serving: Vec<ApproachId> = self.supervisor.active_approaches().into_iter().collect();
        StateSnapshot {
            tick: self.ticks,
            clock_ms: u64::try_from(self.clock.as_millis()).unwrap_or(u64::MAX),
            phase_id: state.phase.clone(),
            sub_state: state.sub_state,
            remaining_sec: state.remaining().as_secs_f64(),
            mode: self.strategy.mode(),
            pending_mode: self.pending.as_ref().map(|p| p.mode),
            used_fallback: state.fallback.is_some(),
            fallback_reason: state.fallback,
            emergency_active: !serving.is_empty(),
            emergency_approach_id: serving.first().cloned(),
            emergency_approach_ids: serving,
            queued_emergencies: self
                .supervisor
                .queued()
                .iter()
                .map(|e| e.approach.clone())
                .collect(),
            preempted_from: state.preempted_from.clone(),
            total_queue_by_approach: self.approaches.queues(),
        }
    }

    // ========================================================================
    // Input Handling
    // ========================================================================

    fn apply(&mut self, input: ControlInput, now: Duration) -> Result<(), RejectedInput> {
        let kind = input.kind();
        let reject = |reason: String| RejectedInput { kind, reason };

        match input {
            ControlInput::Telemetry(report) => match self.approaches.apply_telemetry(&report) {
                TelemetryOutcome::Applied => Ok(()),
                TelemetryOutcome::OutOfOrder => {
                    debug!(
                        approach = %report.approach_id,
                        timestamp_ms = report.timestamp_ms,
                        "out-of-order telemetry discarded"
                    );
                    Ok(())
                }
                TelemetryOutcome::UnknownApproach => Err(reject(format!(
                    "unknown approach '{}'",
                    report.approach_id
                ))),
            },
            ControlInput::Emergency(report) => {
                match self.supervisor.ingest(&report, &mut self.approaches, now) {
                    EmergencyOutcome::UnknownApproach => Err(reject(format!(
                        "unknown approach '{}'",
                        report.approach_id
                    ))),
                    _ => Ok(()),
                }
            }
            ControlInput::Mode(command) => self.apply_mode(command).map_err(reject),
            ControlInput::Advisory(report) => self.apply_advisory(report, now).map_err(reject),
        }
    }

    /// Queues a strategy switch for the next boundary. A manual command
    /// for an already-active manual mode is queued on the strategy itself.
    fn apply_mode(&mut self, command: ModeCommand) -> Result<(), String> {
        let manual = match (command.manual_phase_id, command.manual_duration_sec) {
            (Some(phase), secs) => Some(ManualCommand {
                phase,
                duration: secs.map(seconds).transpose()?,
            }),
            (None, Some(_)) => return Err("manualDurationSec given without manualPhaseId".into()),
            (None, None) => None,
        };
        if manual.is_some() && command.mode != ControlMode::Manual {
            return Err(format!("manual phase given for mode '{}'", command.mode));
        }

        if command.mode == self.strategy.mode() {
            self.pending = None;
            if let (Some(manual), Some(control)) = (manual, self.strategy.as_manual_mut()) {
                debug!(phase = %manual.phase, "manual command queued");
                control.queue(manual);
            }
            return Ok(());
        }

        debug!(mode = %command.mode, "mode switch queued for next boundary");
        self.pending = Some(PendingSwitch {
            mode: command.mode,
            command: manual,
        });
        Ok(())
    }

    fn apply_advisory(&mut self, report: AdvisoryReport, now: Duration) -> Result<(), String> {
        let duration = seconds(report.duration_sec)?;
        self.advisory = Some(Advisory {
            phase: report.phase_id,
            duration,
            confidence: report.confidence,
            received_at: now,
        });
        Ok(())
    }
}

fn seconds(value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("invalid duration {value}: {e}"))
}

// ============================================================================
// Tests
// ============================================================================
