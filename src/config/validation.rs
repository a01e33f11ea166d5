//! Configuration validation
//!
//! Schema and semantic validation for controller configurations. Validation
//! runs on the fully deserialized `ControllerConfig` and collects ALL errors
//! (it doesn't stop at the first) so an operator can fix a topology in one
//! pass.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use crate::config::loader::ConfigLimits;
use crate::config::schema::{
    AdaptiveSettings, ApproachConfig, ControllerConfig, EmergencySettings, PhaseConfig,
};
use crate::error::{Severity, ValidationIssue};
use crate::topology::ApproachId;

/// Documented band for the preemptive green window.
const GREEN_WINDOW_BAND: (Duration, Duration) = (Duration::from_secs(25), Duration::from_secs(30));

/// Documented band for the post-preemption recovery.
const RECOVERY_BAND: (Duration, Duration) = (Duration::from_secs(2), Duration::from_secs(20));

// ============================================================================
// Public API
// ============================================================================

/// Everything one validation pass found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Blocking issues
    pub errors: Vec<ValidationIssue>,

    /// Logged, fatal only under `--strict`
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// At least one blocking issue.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// No blocking issues; warnings allowed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a parsed site against the topology and timing rules.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every error and warning found.
    pub fn validate(&mut self, config: &ControllerConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_limits(config, limits);

        let approach_ids = self.validate_approaches(&config.approaches);
        self.validate_conflict_symmetry(&config.approaches, &approach_ids);
        let phase_ids = self.validate_phases(config, &approach_ids);
        self.validate_cycle(config, &phase_ids);

        self.validate_control(config);
        self.validate_strategies(config);
        self.validate_emergency(&config.emergency);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Approaches
    // ========================================================================

    /// Checks approach identifiers and references; returns the known ids.
    fn validate_approaches(&mut self, approaches: &[ApproachConfig]) -> HashSet<ApproachId> {
        if approaches.is_empty() {
            self.add_error("approaches", "At least one approach is required");
        }

        let mut seen = HashSet::new();
        for (i, approach) in approaches.iter().enumerate() {
            let path = format!("approaches[{i}].id");
            if approach.id.as_str().is_empty() {
                self.add_error(&path, "Approach id cannot be empty");
            } else if !seen.insert(approach.id.clone()) {
                self.add_error(&path, &format!("Duplicate approach id '{}'", approach.id));
            }
        }

        for (i, approach) in approaches.iter().enumerate() {
            for conflict in &approach.conflicts {
                let path = format!("approaches[{i}].conflicts");
                if conflict == &approach.id {
                    self.add_error(
                        &path,
                        &format!("Approach '{}' cannot conflict with itself", approach.id),
                    );
                } else if !seen.contains(conflict) {
                    self.add_unknown_approach(&path, conflict, &seen);
                }
            }
            for downstream in &approach.releases_into {
                if !seen.contains(downstream) {
                    self.add_unknown_approach(
                        &format!("approaches[{i}].releases_into"),
                        downstream,
                        &seen,
                    );
                }
            }
        }

        seen
    }

    /// Every conflict edge must be declared on both ends.
    fn validate_conflict_symmetry(
        &mut self,
        approaches: &[ApproachConfig],
        known: &HashSet<ApproachId>,
    ) {
        let declared: HashMap<&ApproachId, BTreeSet<&ApproachId>> = approaches
            .iter()
            .map(|a| (&a.id, a.conflicts.iter().collect()))
            .collect();

        for (i, approach) in approaches.iter().enumerate() {
            for other in &approach.conflicts {
                if other == &approach.id || !known.contains(other) {
                    continue;
                }
                let mirrored = declared
                    .get(other)
                    .is_some_and(|set| set.contains(&approach.id));
                if !mirrored {
                    self.add_error(
                        &format!("approaches[{i}].conflicts"),
                        &format!(
                            "Conflict graph is not symmetric: '{}' conflicts with '{other}' \
                             but '{other}' does not list '{}'",
                            approach.id, approach.id
                        ),
                    );
                }
            }
        }
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Checks phase membership and timing; returns the known phase ids.
    fn validate_phases(
        &mut self,
        config: &ControllerConfig,
        approaches: &HashSet<ApproachId>,
    ) -> HashSet<String> {
        if config.phases.is_empty() {
            self.add_error("phases", "At least one phase is required");
        }

        let conflicts: HashMap<&ApproachId, &Vec<ApproachId>> = config
            .approaches
            .iter()
            .map(|a| (&a.id, &a.conflicts))
            .collect();

        let mut seen = HashSet::new();
        for (i, phase) in config.phases.iter().enumerate() {
            let base = format!("phases[{i}]");
            if phase.id.as_str().is_empty() {
                self.add_error(&format!("{base}.id"), "Phase id cannot be empty");
            } else if !seen.insert(phase.id.as_str().to_string()) {
                self.add_error(
                    &format!("{base}.id"),
                    &format!("Duplicate phase id '{}'", phase.id),
                );
            }

            self.validate_phase_members(phase, &base, approaches, &conflicts);
            self.validate_phase_timing(phase, &base);
        }

        for approach in &config.approaches {
            let served = config
                .phases
                .iter()
                .any(|p| p.approaches.contains(&approach.id));
            if !served {
                self.add_warning(
                    "phases",
                    &format!("Approach '{}' is not served by any phase", approach.id),
                );
            }
        }

        seen
    }

    fn validate_phase_members(
        &mut self,
        phase: &PhaseConfig,
        base: &str,
        approaches: &HashSet<ApproachId>,
        conflicts: &HashMap<&ApproachId, &Vec<ApproachId>>,
    ) {
        let path = format!("{base}.approaches");
        if phase.approaches.is_empty() {
            self.add_error(&path, &format!("Phase '{}' releases no approaches", phase.id));
            return;
        }

        let mut members = BTreeSet::new();
        for member in &phase.approaches {
            if !members.insert(member) {
                self.add_warning(
                    &path,
                    &format!("Approach '{member}' is listed twice in phase '{}'", phase.id),
                );
            }
            if !approaches.contains(member) {
                self.add_unknown_approach(&path, member, approaches);
            }
        }

        let ordered: Vec<&ApproachId> = members.into_iter().collect();
        for (idx, a) in ordered.iter().enumerate() {
            for b in &ordered[idx + 1..] {
                let clash = conflicts.get(a).is_some_and(|c| c.contains(b))
                    || conflicts.get(b).is_some_and(|c| c.contains(a));
                if clash {
                    self.add_error(
                        &path,
                        &format!(
                            "Phase '{}' contains internally conflicting approaches '{a}' and '{b}'",
                            phase.id
                        ),
                    );
                }
            }
        }
    }

    fn validate_phase_timing(&mut self, phase: &PhaseConfig, base: &str) {
        for (field, value) in [
            ("min_green", phase.min_green.get()),
            ("max_green", phase.max_green.get()),
            ("yellow", phase.yellow.get()),
            ("all_red", phase.all_red.get()),
        ] {
            if value.is_zero() {
                self.add_error(
                    &format!("{base}.{field}"),
                    &format!("Phase '{}' {field} must be positive", phase.id),
                );
            }
        }

        if phase.min_green > phase.max_green {
            self.add_error(
                &format!("{base}.min_green"),
                &format!(
                    "Phase '{}' min_green ({}) exceeds max_green ({})",
                    phase.id, phase.min_green, phase.max_green
                ),
            );
        }
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    fn validate_cycle(&mut self, config: &ControllerConfig, phases: &HashSet<String>) {
        if config.cycle.is_empty() {
            self.add_error("cycle", "Default cycle must list at least one phase");
        }

        for (i, id) in config.cycle.iter().enumerate() {
            if !phases.contains(id.as_str()) {
                let suggestion = suggest(id.as_str(), phases.iter().map(String::as_str));
                self.add_error(
                    &format!("cycle[{i}]"),
                    &format!("Unknown phase '{id}'{suggestion}"),
                );
            }
        }

        for phase in &config.phases {
            if !config.cycle.contains(&phase.id) {
                self.add_warning(
                    "cycle",
                    &format!(
                        "Phase '{}' is never visited by the default cycle; \
                         only adaptive strategies can select it",
                        phase.id
                    ),
                );
            }
        }
    }

    // ========================================================================
    // Control / Strategies / Emergency
    // ========================================================================

    fn validate_control(&mut self, config: &ControllerConfig) {
        if config.control.tick.get().is_zero() {
            self.add_error("control.tick", "Tick period must be positive");
        }
        if config.control.inbox_capacity == 0 {
            self.add_error("control.inbox_capacity", "Inbox capacity must be positive");
        }
    }

    fn validate_strategies(&mut self, config: &ControllerConfig) {
        let strategies = &config.strategies;
        if strategies.fixed.green.get().is_zero() {
            self.add_error("strategies.fixed.green", "Fixed green must be positive");
        }
        if strategies.max_pressure.base_green.get().is_zero() {
            self.add_error(
                "strategies.max_pressure.base_green",
                "Base green must be positive",
            );
        }
        self.validate_adaptive(&strategies.adaptive);
    }

    fn validate_adaptive(&mut self, adaptive: &AdaptiveSettings) {
        self.validate_threshold(
            "strategies.adaptive.confidence_threshold",
            adaptive.confidence_threshold,
        );
        if adaptive.advisory_max_age.get().is_zero() {
            self.add_error(
                "strategies.adaptive.advisory_max_age",
                "Advisory max age must be positive",
            );
        }
    }

    fn validate_emergency(&mut self, emergency: &EmergencySettings) {
        self.validate_threshold("emergency.confidence_threshold", emergency.confidence_threshold);

        for (field, value) in [
            ("emergency.green_window", emergency.green_window.get()),
            ("emergency.max_window", emergency.max_window.get()),
            ("emergency.recovery", emergency.recovery.get()),
        ] {
            if value.is_zero() {
                self.add_error(field, "Duration must be positive");
            }
        }
        if emergency.clearance.is_some_and(|c| c.get().is_zero()) {
            self.add_error("emergency.clearance", "Duration must be positive");
        }
        if emergency.detection_hold.is_some_and(|h| h.get().is_zero()) {
            self.add_error("emergency.detection_hold", "Duration must be positive");
        }

        if emergency.green_window > emergency.max_window {
            self.add_error(
                "emergency.green_window",
                &format!(
                    "Green window ({}) exceeds max_window ({})",
                    emergency.green_window, emergency.max_window
                ),
            );
        }

        let window = emergency.green_window.get();
        if window < GREEN_WINDOW_BAND.0 || window > GREEN_WINDOW_BAND.1 {
            self.add_warning(
                "emergency.green_window",
                &format!(
                    "Green window {} is outside the documented 25-30s band",
                    emergency.green_window
                ),
            );
        }

        let recovery = emergency.recovery.get();
        if recovery < RECOVERY_BAND.0 || recovery > RECOVERY_BAND.1 {
            self.add_warning(
                "emergency.recovery",
                &format!(
                    "Recovery {} is outside the documented 2-20s band",
                    emergency.recovery
                ),
            );
        }
    }

    fn validate_threshold(&mut self, path: &str, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            self.add_error(
                path,
                &format!("Confidence threshold must be between 0.0 and 1.0, got {value}"),
            );
        }
    }

    // ========================================================================
    // Limits
    // ========================================================================

    fn validate_limits(&mut self, config: &ControllerConfig, limits: &ConfigLimits) {
        if config.approaches.len() > limits.max_approaches {
            self.add_error(
                "approaches",
                &format!(
                    "Too many approaches: {} (limit: {})",
                    config.approaches.len(),
                    limits.max_approaches
                ),
            );
        }
        if config.phases.len() > limits.max_phases {
            self.add_error(
                "phases",
                &format!(
                    "Too many phases: {} (limit: {})",
                    config.phases.len(),
                    limits.max_phases
                ),
            );
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn add_unknown_approach(&mut self, path: &str, id: &ApproachId, known: &HashSet<ApproachId>) {
        let suggestion = suggest(id.as_str(), known.iter().map(ApproachId::as_str));
        self.add_error(path, &format!("Unknown approach '{id}'{suggestion}"));
    }

    /// Records a finding that blocks loading.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Records a non-blocking finding.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a "did you mean" hint for the closest known identifier.
///
/// Returns an empty string when nothing is within edit distance 2.
fn suggest<'a>(input: &str, candidates: impl Iterator<Item = &'a str>) -> String {
    candidates
        .map(|c| (c, strsim::damerau_levenshtein(input, c)))
        .filter(|(_, dist)| *dist <= 2)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map_or_else(String::new, |(name, _)| format!(" (did you mean '{name}'?)"))
}

// ============================================================================
// Tests
// ============================================================================
