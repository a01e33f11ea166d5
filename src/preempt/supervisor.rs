//! Emergency preemption supervisor
//!
//! Turns emergency reports into safe overrides of the normal rotation. The
//! supervisor never writes signal state itself: it asks the phase state
//! machine to request, merge, extend or release a preemption, and the
//! machine decides when the next legal boundary is reached.
//!
//! Events move through `queued` (detected, not yet served), then either
//! `active` (held by the current preemption) or `in_phase` (the approach
//! was already green), and finally `history` (resolved, retained for
//! audit).
//!
//! A detection gets one capped window. An approach whose window ran out
//! while its flag stayed set is latched: further reports refresh the flag
//! but raise nothing until the flag clears.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::schema::EmergencySettings;
use crate::controller::ApproachTable;
use crate::controller::inbox::EmergencyReport;
use crate::signal::{PhaseStateMachine, PreemptionStage, SubState};
use crate::topology::{ApproachId, PhaseId};

use super::event::{EmergencyEvent, Resolution};

// ============================================================================
// Policy
// ============================================================================

/// Thresholds and windows governing preemption.
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionPolicy {
    /// Minimum detection confidence that raises an event
    pub confidence_threshold: f64,
    /// Preemptive green window, also the in-phase extension
    pub green_window: Duration,
    /// Extension granted while the flag stays set
    pub extension: Duration,
    /// Hard cap on preemptive green
    pub max_window: Duration,
    /// Auto-clear a flag after this long without a refresh
    pub detection_hold: Option<Duration>,
    /// Resolved events retained
    pub history_limit: usize,
}

impl From<&EmergencySettings> for PreemptionPolicy {
    fn from(settings: &EmergencySettings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            green_window: settings.green_window.get(),
            extension: settings.extension.get(),
            max_window: settings.max_window.get(),
            detection_hold: settings.detection_hold.map(Into::into),
            history_limit: settings.history_limit,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of ingesting one emergency report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyOutcome {
    /// A new event was queued
    Raised(Uuid),
    /// An unresolved event for the approach was refreshed
    Refreshed(Uuid),
    /// The approach already had its window; the flag was refreshed only
    Latched,
    /// The approach's flag was cleared
    Cleared,
    /// Confidence below threshold; ignored
    BelowThreshold,
    /// The approach is not part of the topology
    UnknownApproach,
}

/// Something the supervisor did during one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PreemptionUpdate {
    /// A preemption was requested for these approaches
    Started {
        /// Approaches to hold green
        approaches: BTreeSet<ApproachId>,
        /// Events served by the preemption
        events: Vec<Uuid>,
    },
    /// A non-conflicting event joined the running preemption
    Merged {
        /// Approach added
        approach: ApproachId,
        /// Event added
        event: Uuid,
    },
    /// The preemptive green was lengthened
    Extended {
        /// New total window
        window: Duration,
    },
    /// The emergency approach was already green; the phase was extended
    ServedInPhase {
        /// Phase extended
        phase: PhaseId,
        /// Emergency approach
        approach: ApproachId,
    },
    /// The preemption was ended early
    Released,
    /// An event was resolved
    Resolved(EmergencyEvent),
}

// ============================================================================
// Supervisor
// ============================================================================

/// Tracks emergency events and drives preemption on the state machine.
#[derive(Debug, Clone)]
pub struct PreemptionSupervisor {
    policy: PreemptionPolicy,
    active: Vec<EmergencyEvent>,
    queued: Vec<EmergencyEvent>,
    in_phase: Vec<EmergencyEvent>,
    latched: BTreeSet<ApproachId>,
    history: VecDeque<EmergencyEvent>,
}

impl PreemptionSupervisor {
    /// Creates a supervisor with no events.
    #[must_use]
    pub fn new(policy: PreemptionPolicy) -> Self {
        Self {
            policy,
            active: Vec::new(),
            queued: Vec::new(),
            in_phase: Vec::new(),
            latched: BTreeSet::new(),
            history: VecDeque::new(),
        }
    }

    /// Policy in force.
    #[must_use]
    pub const fn policy(&self) -> &PreemptionPolicy {
        &self.policy
    }

    /// Events held by the current preemption.
    #[must_use]
    pub fn active(&self) -> &[EmergencyEvent] {
        &self.active
    }

    /// Events waiting to be served, in arrival order.
    #[must_use]
    pub fn queued(&self) -> &[EmergencyEvent] {
        &self.queued
    }

    /// Events whose approach was already green, held while it stays green.
    #[must_use]
    pub fn served_in_phase(&self) -> &[EmergencyEvent] {
        &self.in_phase
    }

    /// Returns `true` if `approach` used up its window and its flag has not
    /// cleared since.
    #[must_use]
    pub fn is_latched(&self, approach: &ApproachId) -> bool {
        self.latched.contains(approach)
    }

    /// Resolved events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &EmergencyEvent> {
        self.history.iter()
    }

    /// Returns `true` while some event is being served.
    #[must_use]
    pub fn is_preempting(&self) -> bool {
        !self.active.is_empty()
    }

    /// Approaches of the events being served.
    #[must_use]
    pub fn active_approaches(&self) -> BTreeSet<ApproachId> {
        self.active.iter().map(|e| e.approach.clone()).collect()
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Applies one emergency report to the approach flags and the event
    /// queue.
    pub fn ingest(
        &mut self,
        report: &EmergencyReport,
        approaches: &mut ApproachTable,
        now: Duration,
    ) -> EmergencyOutcome {
        let id = &report.approach_id;
        if approaches.get(id).is_none() {
            return EmergencyOutcome::UnknownApproach;
        }

        if !report.active {
            approaches.set_emergency(id, false, now);
            self.latched.remove(id);
            debug!(approach = %id, "emergency flag cleared");
            return EmergencyOutcome::Cleared;
        }

        if report.confidence.is_nan() || report.confidence < self.policy.confidence_threshold {
            debug!(
                approach = %id,
                confidence = report.confidence,
                threshold = self.policy.confidence_threshold,
                "emergency below confidence threshold"
            );
            return EmergencyOutcome::BelowThreshold;
        }

        approaches.set_emergency(id, true, now);

        if self.latched.contains(id) {
            debug!(approach = %id, "emergency window already spent");
            return EmergencyOutcome::Latched;
        }

        if let Some(event) = self
            .active
            .iter_mut()
            .chain(self.queued.iter_mut())
            .chain(self.in_phase.iter_mut())
            .find(|e| &e.approach == id)
        {
            event.confidence = event.confidence.max(report.confidence);
            return EmergencyOutcome::Refreshed(event.id);
        }

        let event = EmergencyEvent::new(id.clone(), report.timestamp_ms, report.confidence, now);
        info!(
            event = %event.id,
            approach = %id,
            confidence = report.confidence,
            "emergency raised"
        );
        let event_id = event.id;
        self.queued.push(event);
        EmergencyOutcome::Raised(event_id)
    }

    // ========================================================================
    // Per-Tick Supervision
    // ========================================================================

    /// Runs once per tick, before the state machine advances by `step`.
    pub fn supervise(
        &mut self,
        machine: &mut PhaseStateMachine,
        approaches: &mut ApproachTable,
        now: Duration,
        step: Duration,
    ) -> Vec<PreemptionUpdate> {
        let mut updates = Vec::new();

        if let Some(hold) = self.policy.detection_hold {
            for id in approaches.expire_emergencies(now, hold) {
                debug!(approach = %id, "emergency detection hold expired");
            }
        }

        self.latched.retain(|id| approaches.emergency(id));

        self.resolve_cleared(approaches, machine, now, &mut updates);
        self.hold_in_phase(machine, approaches, now, &mut updates);
        self.extend_or_expire(machine, now, step, &mut updates);
        self.serve_queue(machine, &mut updates);
        self.merge_queue(machine, &mut updates);

        updates
    }

    /// Resolves events whose approach flag has cleared, and releases the
    /// preemption once nothing holds it.
    fn resolve_cleared(
        &mut self,
        approaches: &ApproachTable,
        machine: &mut PhaseStateMachine,
        now: Duration,
        updates: &mut Vec<PreemptionUpdate>,
    ) {
        let had_active = !self.active.is_empty();

        let (cleared, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|e| !approaches.emergency(&e.approach));
        self.active = held;
        for event in cleared {
            self.finish(event, Resolution::Cleared, now, updates);
        }

        let (cancelled, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.queued)
            .into_iter()
            .partition(|e| !approaches.emergency(&e.approach));
        self.queued = waiting;
        for event in cancelled {
            self.finish(event, Resolution::Cancelled, now, updates);
        }

        let holding = matches!(
            machine.preemption_stage(),
            PreemptionStage::Requested | PreemptionStage::Clearing | PreemptionStage::Green
        );
        if had_active && self.active.is_empty() && holding {
            machine.release_preemption();
            info!("preemption released");
            updates.push(PreemptionUpdate::Released);
        }
    }

    /// Keeps extending a normal green that serves a flagged approach. Once
    /// the flag clears or the green ends the event is resolved; a green that
    /// ran out on its own latches the approach.
    fn hold_in_phase(
        &mut self,
        machine: &mut PhaseStateMachine,
        approaches: &ApproachTable,
        now: Duration,
        updates: &mut Vec<PreemptionUpdate>,
    ) {
        if self.in_phase.is_empty() {
            return;
        }

        let (held, done): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_phase)
            .into_iter()
            .partition(|e| {
                approaches.emergency(&e.approach)
                    && Self::green_phase_serving(machine, &BTreeSet::from([e.approach.clone()]))
                        .is_some()
            });
        self.in_phase = held;

        let natural_end = machine.preemption_stage() == PreemptionStage::Idle;
        for event in done {
            if natural_end && approaches.emergency(&event.approach) {
                debug!(approach = %event.approach, "in-phase window spent");
                self.latched.insert(event.approach.clone());
            }
            self.finish(event, Resolution::ServedInPhase, now, updates);
        }

        if !self.in_phase.is_empty() {
            machine.extend_green(self.policy.green_window, self.policy.max_window);
        }
    }

    /// Extends a preemptive green about to end while flags are still set,
    /// resolving its events once the maximum window is reached.
    fn extend_or_expire(
        &mut self,
        machine: &mut PhaseStateMachine,
        now: Duration,
        step: Duration,
        updates: &mut Vec<PreemptionUpdate>,
    ) {
        if self.active.is_empty() {
            return;
        }

        match machine.preemption_stage() {
            PreemptionStage::Green if machine.state().remaining() <= step => {
                match machine.extend_preempt_window(self.policy.extension, self.policy.max_window)
                {
                    Some(window) => {
                        debug!(window_ms = window.as_millis(), "preemptive green extended");
                        updates.push(PreemptionUpdate::Extended { window });
                    }
                    None => self.finish_active(Resolution::MaxWindow, now, updates),
                }
            }
            PreemptionStage::Idle | PreemptionStage::Releasing => {
                warn!("preemption ended with events still held");
                self.finish_active(Resolution::MaxWindow, now, updates);
            }
            _ => {}
        }
    }

    /// Starts serving the earliest queued event, together with every queued
    /// event that does not conflict with it.
    fn serve_queue(&mut self, machine: &mut PhaseStateMachine, updates: &mut Vec<PreemptionUpdate>) {
        let stage = machine.preemption_stage();
        if self.queued.is_empty()
            || !matches!(stage, PreemptionStage::Idle | PreemptionStage::Releasing)
        {
            return;
        }

        self.queued.sort_by_key(|e| e.detected_at_ms);

        let mut set = BTreeSet::new();
        let mut picked = Vec::new();
        for event in &self.queued {
            let mut candidate = set.clone();
            candidate.insert(event.approach.clone());
            if machine.topology().is_conflict_free(&candidate) {
                set = candidate;
                picked.push(event.id);
            }
        }
        if picked.is_empty() {
            return;
        }

        let (selected, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.queued)
            .into_iter()
            .partition(|e| picked.contains(&e.id));
        self.queued = rest;

        if stage == PreemptionStage::Idle
            && let Some(phase) = Self::green_phase_serving(machine, &set)
        {
            machine.extend_green(self.policy.green_window, self.policy.max_window);
            for event in selected {
                info!(event = %event.id, phase = %phase, "emergency served in phase");
                updates.push(PreemptionUpdate::ServedInPhase {
                    phase: phase.clone(),
                    approach: event.approach.clone(),
                });
                self.in_phase.push(event);
            }
            return;
        }

        if machine.request_preemption(set.clone()) {
            info!(approaches = ?set, "preemption requested");
            updates.push(PreemptionUpdate::Started {
                approaches: set,
                events: selected.iter().map(|e| e.id).collect(),
            });
            self.active.extend(selected);
        } else {
            warn!(approaches = ?set, "preemption request not accepted");
            self.queued.extend(selected);
        }
    }

    /// Adds queued events to a running preemption where they do not conflict.
    fn merge_queue(&mut self, machine: &mut PhaseStateMachine, updates: &mut Vec<PreemptionUpdate>) {
        if self.active.is_empty() || self.queued.is_empty() {
            return;
        }

        let mut waiting = Vec::with_capacity(self.queued.len());
        for event in std::mem::take(&mut self.queued) {
            let single = BTreeSet::from([event.approach.clone()]);
            if machine.merge_preemption(&single) {
                info!(event = %event.id, approach = %event.approach, "emergency merged");
                updates.push(PreemptionUpdate::Merged {
                    approach: event.approach.clone(),
                    event: event.id,
                });
                self.active.push(event);
            } else {
                waiting.push(event);
            }
        }
        self.queued = waiting;
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Phase currently green in normal operation that serves every approach
    /// in `set`.
    fn green_phase_serving(
        machine: &PhaseStateMachine,
        set: &BTreeSet<ApproachId>,
    ) -> Option<PhaseId> {
        let state = machine.state();
        if state.sub_state != SubState::Green {
            return None;
        }
        let phase = state.phase.as_ref().and_then(|id| machine.topology().phase(id))?;
        set.iter()
            .all(|a| phase.serves(a))
            .then(|| phase.id.clone())
    }

    fn finish_active(
        &mut self,
        resolution: Resolution,
        now: Duration,
        updates: &mut Vec<PreemptionUpdate>,
    ) {
        for event in std::mem::take(&mut self.active) {
            if resolution == Resolution::MaxWindow {
                self.latched.insert(event.approach.clone());
            }
            self.finish(event, resolution, now, updates);
        }
    }

    fn finish(
        &mut self,
        mut event: EmergencyEvent,
        resolution: Resolution,
        now: Duration,
        updates: &mut Vec<PreemptionUpdate>,
    ) {
        event.resolve(resolution, now);
        info!(
            event = %event.id,
            approach = %event.approach,
            resolution = %resolution,
            "emergency resolved"
        );
        updates.push(PreemptionUpdate::Resolved(event.clone()));
        self.history.push_back(event);
        while self.history.len() > self.policy.history_limit {
            self.history.pop_front();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
