//! Phase state machine
//!
//! Owns the authoritative [`SignalState`] and enforces the clearance
//! sequence. Normal operation cycles
//! `GREEN(p) → YELLOW(p) → ALL_RED → GREEN(p')`; a preemption runs
//! `PREEMPT_CLEAR → PREEMPT_GREEN → YELLOW → PREEMPT_RECOVERY` and then
//! resumes normal operation. Strategies are consulted only when a fresh
//! GREEN is about to start.
//!
//! The machine never fails on bad strategy output. Unknown or conflicting
//! phases are replaced by the rotation's next phase and durations are
//! clamped into the phase's green bounds; every such change is recorded as a
//! [`Correction`] on the resulting [`Commit`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::schema::EmergencySettings;
use crate::error::PhaseError;
use crate::strategy::{ControlMode, Decision};
use crate::topology::{ApproachId, Phase, Topology};

use super::state::{
    Commit, Correction, PreemptedFrom, PreemptionStage, SignalSnapshot, SignalState, SubState,
    Transition,
};

// ============================================================================
// Preemption Timing
// ============================================================================

/// Fixed intervals of the preemption sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptTiming {
    /// Configured clearance; never shorter than the vacated phase's all-red
    pub clearance: Option<Duration>,
    /// Initial preemptive green window
    pub green_window: Duration,
    /// All-red recovery after preemptive green
    pub recovery: Duration,
}

impl From<&EmergencySettings> for PreemptTiming {
    fn from(settings: &EmergencySettings) -> Self {
        Self {
            clearance: settings.clearance.map(Into::into),
            green_window: settings.green_window.get(),
            recovery: settings.recovery.get(),
        }
    }
}

// ============================================================================
// State Machine
// ============================================================================

/// The single writer of [`SignalState`].
#[derive(Debug, Clone)]
pub struct PhaseStateMachine {
    topology: Arc<Topology>,
    timing: PreemptTiming,
    state: SignalState,
    /// Approaches of a requested preemption not yet clearing
    pending: Option<BTreeSet<ApproachId>>,
    /// The current YELLOW follows a preemptive green
    preempt_exit: bool,
    /// Committed green before a preemption request cut it back
    uncut_green: Option<Duration>,
}

impl PhaseStateMachine {
    /// Creates a machine in ALL_RED with no prior phase.
    #[must_use]
    pub fn new(topology: Arc<Topology>, timing: PreemptTiming, mode: ControlMode) -> Self {
        let state = SignalState::new(mode, topology.max_all_red());
        Self {
            topology,
            timing,
            state,
            pending: None,
            preempt_exit: false,
            uncut_green: None,
        }
    }

    /// Topology the machine was built for.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Read-only view of the live state.
    #[must_use]
    pub const fn state(&self) -> &SignalState {
        &self.state
    }

    /// Immutable copy of the state with derived fields.
    #[must_use]
    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot::from(&self.state)
    }

    /// Approaches currently showing green.
    #[must_use]
    pub fn moving_approaches(&self) -> BTreeSet<ApproachId> {
        match self.state.sub_state {
            SubState::Green => self
                .current_phase()
                .map(|p| p.approaches.clone())
                .unwrap_or_default(),
            SubState::PreemptGreen => self.state.preempt_approaches.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// Where the current preemption, if any, stands.
    #[must_use]
    pub const fn preemption_stage(&self) -> PreemptionStage {
        if self.pending.is_some() {
            return PreemptionStage::Requested;
        }
        match self.state.sub_state {
            SubState::PreemptClear => PreemptionStage::Clearing,
            SubState::PreemptGreen => PreemptionStage::Green,
            SubState::PreemptRecovery => PreemptionStage::Releasing,
            SubState::Yellow if self.preempt_exit => PreemptionStage::Releasing,
            _ => PreemptionStage::Idle,
        }
    }

    /// Approaches of the preemption that is requested or in progress.
    #[must_use]
    pub fn preemption_approaches(&self) -> Option<&BTreeSet<ApproachId>> {
        if let Some(pending) = &self.pending {
            return Some(pending);
        }
        match self.preemption_stage() {
            PreemptionStage::Clearing | PreemptionStage::Green => {
                Some(&self.state.preempt_approaches)
            }
            _ => None,
        }
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Advances time by `elapsed`, performing every transition that falls
    /// due. `decide` is called each time a fresh GREEN is about to start.
    pub fn tick<F>(&mut self, elapsed: Duration, mut decide: F) -> Vec<Transition>
    where
        F: FnMut(&SignalState) -> Decision,
    {
        let mut transitions = Vec::new();
        let mut budget = elapsed;

        loop {
            let remaining = self.state.remaining();
            if budget < remaining {
                self.state.elapsed += budget;
                break;
            }
            budget -= remaining;
            self.state.elapsed = self.state.required;
            transitions.push(self.advance(&mut decide));
        }

        transitions
    }

    fn advance<F>(&mut self, decide: &mut F) -> Transition
    where
        F: FnMut(&SignalState) -> Decision,
    {
        match self.state.sub_state {
            SubState::Green => {
                let yellow = self
                    .current_phase()
                    .map_or_else(|| self.topology.max_yellow(), |p| p.yellow);
                self.enter(SubState::Yellow, yellow)
            }
            SubState::Yellow if self.preempt_exit => {
                self.preempt_exit = false;
                self.state.preempt_approaches.clear();
                let recovery = self.recovery_duration();
                self.enter(SubState::PreemptRecovery, recovery)
            }
            SubState::Yellow => {
                if let Some(set) = self.pending.take() {
                    return self.enter_preempt_clear(set);
                }
                let all_red = self
                    .current_phase()
                    .map_or_else(|| self.topology.max_all_red(), |p| p.all_red);
                self.enter(SubState::AllRed, all_red)
            }
            SubState::AllRed | SubState::PreemptRecovery => {
                if let Some(set) = self.pending.take() {
                    return self.enter_preempt_clear(set);
                }
                self.anchor_resume();
                let decision = decide(&self.state);
                self.start_green(decision)
            }
            SubState::PreemptClear => {
                info!(
                    approaches = ?self.state.preempt_approaches,
                    window_ms = self.timing.green_window.as_millis(),
                    "preemptive green"
                );
                self.enter(SubState::PreemptGreen, self.timing.green_window)
            }
            SubState::PreemptGreen => {
                self.preempt_exit = true;
                self.enter(SubState::Yellow, self.topology.max_yellow())
            }
        }
    }

    fn start_green(&mut self, decision: Decision) -> Transition {
        let from = self.state.sub_state;
        match self.commit_decision(decision) {
            Some(commit) => Transition {
                from,
                to: SubState::Green,
                phase: Some(commit.phase.clone()),
                commit: Some(commit),
            },
            None => {
                error!("no usable phase in topology, holding all-red");
                self.enter(SubState::AllRed, self.topology.max_all_red())
            }
        }
    }

    fn enter(&mut self, to: SubState, required: Duration) -> Transition {
        let from = self.state.sub_state;
        self.uncut_green = None;
        self.state.sub_state = to;
        self.state.elapsed = Duration::ZERO;
        self.state.required = required;
        debug!(
            from = %from,
            to = %to,
            required_ms = required.as_millis(),
            "signal transition"
        );
        Transition {
            from,
            to,
            phase: self.state.phase.clone(),
            commit: None,
        }
    }

    // ========================================================================
    // Committing Decisions
    // ========================================================================

    /// Commits a decision at an ALL_RED or PREEMPT_RECOVERY boundary.
    ///
    /// [`PhaseStateMachine::tick`] calls this with the output of its
    /// `decide` callback; direct callers must wait for the boundary.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::ClearanceInProgress` if the current mandatory
    /// interval has not finished or a preemption is waiting, and
    /// `PhaseError::NotFound` if neither the requested phase nor any
    /// substitute exists.
    pub fn request_phase(&mut self, decision: Decision) -> Result<Commit, PhaseError> {
        let at_boundary = matches!(
            self.state.sub_state,
            SubState::AllRed | SubState::PreemptRecovery
        ) && self.state.remaining().is_zero()
            && self.pending.is_none();

        if !at_boundary {
            return Err(PhaseError::ClearanceInProgress {
                sub_state: self.state.sub_state.to_string(),
                remaining_ms: u64::try_from(self.state.remaining().as_millis())
                    .unwrap_or(u64::MAX),
            });
        }

        let requested = decision.phase.clone();
        self.commit_decision(decision)
            .ok_or_else(|| PhaseError::NotFound(requested.to_string()))
    }

    fn commit_decision(&mut self, decision: Decision) -> Option<Commit> {
        let topology = Arc::clone(&self.topology);
        self.anchor_resume();
        self.state.preempted_from = None;

        let mut corrections = Vec::new();
        let phase = match topology.phase(&decision.phase) {
            Some(p) if topology.is_conflict_free(&p.approaches) => p,
            found => {
                let substitute = self.rotation_fallback(&topology)?;
                let correction = if found.is_some() {
                    Correction::ConflictingPhase {
                        requested: decision.phase.clone(),
                        substituted: substitute.id.clone(),
                    }
                } else {
                    Correction::UnknownPhase {
                        requested: decision.phase.clone(),
                        substituted: substitute.id.clone(),
                    }
                };
                corrections.push(correction);
                substitute
            }
        };

        let duration = phase.clamp_green(decision.duration);
        if duration != decision.duration {
            corrections.push(Correction::DurationClamped {
                phase: phase.id.clone(),
                requested: decision.duration,
                committed: duration,
            });
        }

        for correction in &corrections {
            warn!(strategy = %decision.strategy, correction = %correction, "decision corrected");
        }

        self.state.cycle_position = topology
            .cycle()
            .position_after(self.state.cycle_position, &phase.id)
            .or(self.state.cycle_position);
        self.state.phase = Some(phase.id.clone());
        self.state.sub_state = SubState::Green;
        self.state.elapsed = Duration::ZERO;
        self.state.required = duration;
        self.state.mode = decision.strategy;
        self.state.fallback = decision.fallback;

        info!(
            phase = %phase.id,
            duration_ms = duration.as_millis(),
            strategy = %decision.strategy,
            fallback = decision.fallback.map(|f| f.as_str()),
            "phase committed"
        );

        Some(Commit {
            phase: phase.id.clone(),
            duration,
            strategy: decision.strategy,
            confidence: decision.confidence,
            fallback: decision.fallback,
            corrections,
        })
    }

    /// Next phase of the rotation, used in place of an unusable decision.
    fn rotation_fallback<'t>(&self, topology: &'t Topology) -> Option<&'t Phase> {
        let cycle = topology.cycle();
        cycle
            .get(cycle.next_position(self.state.cycle_position))
            .and_then(|id| topology.phase(id))
            .or_else(|| topology.phases().next())
    }

    // ========================================================================
    // Preemption
    // ========================================================================

    /// Requests preemptive green for `approaches`.
    ///
    /// Accepted only when no other preemption is requested, clearing or
    /// green. The machine reaches PREEMPT_CLEAR at the next legal boundary:
    /// a running GREEN is cut back to what has elapsed but never below its
    /// minimum green, YELLOW and recovery intervals run to completion, and
    /// an ALL_RED becomes PREEMPT_CLEAR in place without losing time.
    ///
    /// Returns `false` if the request was not accepted.
    pub fn request_preemption(&mut self, approaches: BTreeSet<ApproachId>) -> bool {
        if !matches!(
            self.preemption_stage(),
            PreemptionStage::Idle | PreemptionStage::Releasing
        ) || !self.topology.is_conflict_free(&approaches)
        {
            return false;
        }

        match self.state.sub_state {
            SubState::Green => {
                if let Some(min_green) = self.current_phase().map(|p| p.min_green) {
                    let boundary = self.state.elapsed.max(min_green);
                    self.uncut_green = Some(self.state.required);
                    self.state.required = self.state.required.min(boundary);
                }
                self.pending = Some(approaches);
            }
            SubState::AllRed => {
                let clearance = self.clearance_for(self.current_phase());
                self.record_preempted_from();
                self.state.phase = None;
                self.state.preempt_approaches = approaches;
                self.state.sub_state = SubState::PreemptClear;
                self.state.required = self.state.required.max(clearance);
                debug!(
                    required_ms = self.state.required.as_millis(),
                    "all-red converted to preemption clearance"
                );
            }
            _ => self.pending = Some(approaches),
        }

        true
    }

    /// Adds approaches to the preemption that is requested, clearing or
    /// green. Rejected if they conflict with the approaches already held.
    pub fn merge_preemption(&mut self, approaches: &BTreeSet<ApproachId>) -> bool {
        let target = match self.preemption_stage() {
            PreemptionStage::Requested => match self.pending.as_mut() {
                Some(pending) => pending,
                None => return false,
            },
            PreemptionStage::Clearing | PreemptionStage::Green => {
                &mut self.state.preempt_approaches
            }
            PreemptionStage::Idle | PreemptionStage::Releasing => return false,
        };

        let merged: BTreeSet<ApproachId> = target.union(approaches).cloned().collect();
        if !self.topology.is_conflict_free(&merged) {
            return false;
        }
        *target = merged;
        true
    }

    /// Ends the current preemption early.
    ///
    /// A pending request is dropped, and a GREEN it cut back gets its
    /// committed duration again. PREEMPT_CLEAR becomes PREEMPT_RECOVERY
    /// without shortening the all-red. PREEMPT_GREEN leaves through YELLOW.
    pub fn release_preemption(&mut self) -> Option<Transition> {
        match self.preemption_stage() {
            PreemptionStage::Requested => {
                self.pending = None;
                if let Some(required) = self.uncut_green.take()
                    && self.state.sub_state == SubState::Green
                {
                    self.state.required = required;
                }
                None
            }
            PreemptionStage::Clearing => {
                let from = self.state.sub_state;
                self.state.preempt_approaches.clear();
                self.state.sub_state = SubState::PreemptRecovery;
                self.state.required = self.state.required.max(self.recovery_duration());
                Some(Transition {
                    from,
                    to: SubState::PreemptRecovery,
                    phase: None,
                    commit: None,
                })
            }
            PreemptionStage::Green => {
                self.preempt_exit = true;
                Some(self.enter(SubState::Yellow, self.topology.max_yellow()))
            }
            PreemptionStage::Idle | PreemptionStage::Releasing => None,
        }
    }

    /// Lengthens the current normal GREEN so it lasts at least `hold` more,
    /// without exceeding `cap` in total. Used when an emergency approach is
    /// already moving.
    pub fn extend_green(&mut self, hold: Duration, cap: Duration) -> bool {
        if self.state.sub_state != SubState::Green || self.pending.is_some() {
            return false;
        }
        let target = (self.state.elapsed + hold).min(cap);
        self.state.required = self.state.required.max(target);
        true
    }

    /// Lengthens the preemptive green by `extra`, capped at `cap`.
    ///
    /// Returns the new window, or `None` if nothing changed.
    pub fn extend_preempt_window(&mut self, extra: Duration, cap: Duration) -> Option<Duration> {
        if self.state.sub_state != SubState::PreemptGreen {
            return None;
        }
        let window = (self.state.required + extra).min(cap);
        if window <= self.state.required {
            return None;
        }
        self.state.required = window;
        Some(window)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Leaving recovery, the rotation continues after the interrupted phase.
    fn anchor_resume(&mut self) {
        if self.state.sub_state == SubState::PreemptRecovery
            && let Some(from) = &self.state.preempted_from
        {
            self.state.cycle_position = from.cycle_position;
        }
    }

    fn current_phase(&self) -> Option<&Phase> {
        self.state.phase.as_ref().and_then(|id| self.topology.phase(id))
    }

    fn enter_preempt_clear(&mut self, approaches: BTreeSet<ApproachId>) -> Transition {
        let clearance = self.clearance_for(self.current_phase());
        self.record_preempted_from();
        self.state.phase = None;
        self.state.preempt_approaches = approaches;
        self.enter(SubState::PreemptClear, clearance)
    }

    fn record_preempted_from(&mut self) {
        if self.state.preempted_from.is_none() {
            self.state.preempted_from = Some(PreemptedFrom {
                phase: self.state.phase.clone(),
                mode: self.state.mode,
                cycle_position: self.state.cycle_position,
            });
        }
    }

    fn clearance_for(&self, vacated: Option<&Phase>) -> Duration {
        let base = vacated.map_or_else(|| self.topology.max_all_red(), |p| p.all_red);
        self.timing.clearance.map_or(base, |c| c.max(base))
    }

    fn recovery_duration(&self) -> Duration {
        self.timing.recovery.max(self.topology.max_all_red())
    }
}

// ============================================================================
// Tests
// ============================================================================
