//! Intersection topology
//!
//! Static description of the intersection: approaches and their conflict
//! sets, phase definitions with timing bounds, and the default rotation.
//! Built once at startup from a validated [`ControllerConfig`] and shared
//! read-only behind an `Arc` for the life of the process.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigLimits;
use crate::config::schema::ControllerConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of one approach (e.g. `"north"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApproachId(String);

impl ApproachId {
    /// Creates a new `ApproachId`.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApproachId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApproachId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of one phase (e.g. `"ns"`).
///
/// Ordering is lexical and is the tie-break order used by max-pressure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(String);

impl PhaseId {
    /// Creates a new `PhaseId`.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhaseId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// Approach / Phase / Cycle
// ============================================================================

/// Static description of one approach.
#[derive(Debug, Clone)]
pub struct Approach {
    /// Approach identifier
    pub id: ApproachId,
    /// Display name
    pub name: String,
    /// Approaches whose movements conflict with this one
    pub conflicts: BTreeSet<ApproachId>,
    /// Downstream approaches this one discharges into
    pub releases_into: Vec<ApproachId>,
}

/// A set of approaches granted green together, with timing bounds.
#[derive(Debug, Clone)]
pub struct Phase {
    /// Phase identifier
    pub id: PhaseId,
    /// Display name
    pub name: String,
    /// Approaches permitted to move simultaneously
    pub approaches: BTreeSet<ApproachId>,
    /// Minimum green duration
    pub min_green: Duration,
    /// Maximum green duration
    pub max_green: Duration,
    /// Fixed yellow duration
    pub yellow: Duration,
    /// Fixed all-red clearance duration
    pub all_red: Duration,
}

impl Phase {
    /// Clamps a proposed green duration into `[min_green, max_green]`.
    #[must_use]
    pub fn clamp_green(&self, proposed: Duration) -> Duration {
        proposed.clamp(self.min_green, self.max_green)
    }

    /// Returns `true` if this phase releases the given approach.
    #[must_use]
    pub fn serves(&self, approach: &ApproachId) -> bool {
        self.approaches.contains(approach)
    }

    /// Total mandatory clearance after this phase's green (yellow + all-red).
    #[must_use]
    pub fn clearance(&self) -> Duration {
        self.yellow + self.all_red
    }
}

/// Default rotation of phases.
///
/// Positions are indexes into the rotation, so a phase may appear more than
/// once (e.g. a long main-street phase served twice per cycle).
#[derive(Debug, Clone)]
pub struct ControlCycle {
    order: Vec<PhaseId>,
}

impl ControlCycle {
    /// Number of entries in the rotation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the rotation is empty (never the case once validated).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Phase at a rotation position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&PhaseId> {
        self.order.get(position)
    }

    /// Iterates the rotation in order.
    pub fn iter(&self) -> impl Iterator<Item = &PhaseId> {
        self.order.iter()
    }

    /// Position following `from`, wrapping around. `None` starts the rotation.
    #[must_use]
    pub fn next_position(&self, from: Option<usize>) -> usize {
        match from {
            Some(pos) if !self.order.is_empty() => (pos + 1) % self.order.len(),
            _ => 0,
        }
    }

    /// Finds the next occurrence of `phase` strictly after `from`,
    /// searching cyclically. `from == None` searches from the start.
    #[must_use]
    pub fn position_after(&self, from: Option<usize>, phase: &PhaseId) -> Option<usize> {
        let len = self.order.len();
        if len == 0 {
            return None;
        }
        let start = self.next_position(from);
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&pos| &self.order[pos] == phase)
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Immutable intersection topology.
#[derive(Debug, Clone)]
pub struct Topology {
    id: String,
    name: String,
    approaches: IndexMap<ApproachId, Approach>,
    phases: IndexMap<PhaseId, Phase>,
    cycle: ControlCycle,
}

impl Topology {
    /// Validates a configuration and builds the topology from it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` listing every problem found:
    /// internally conflicting phases, an asymmetric conflict graph,
    /// non-positive durations, dangling references.
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        let result = Validator::new().validate(config, &ConfigLimits::default());
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: "<inline>".to_string(),
                errors: result.errors,
            });
        }
        Ok(Self::from_validated(config))
    }

    /// Builds the topology from a configuration that already passed
    /// validation.
    pub(crate) fn from_validated(config: &ControllerConfig) -> Self {
        let approaches = config
            .approaches
            .iter()
            .map(|a| {
                let approach = Approach {
                    id: a.id.clone(),
                    name: a.name.clone().unwrap_or_else(|| a.id.to_string()),
                    conflicts: a.conflicts.iter().cloned().collect(),
                    releases_into: a.releases_into.clone(),
                };
                (a.id.clone(), approach)
            })
            .collect();

        let phases = config
            .phases
            .iter()
            .map(|p| {
                let phase = Phase {
                    id: p.id.clone(),
                    name: p.name.clone().unwrap_or_else(|| p.id.to_string()),
                    approaches: p.approaches.iter().cloned().collect(),
                    min_green: p.min_green.get(),
                    max_green: p.max_green.get(),
                    yellow: p.yellow.get(),
                    all_red: p.all_red.get(),
                };
                (p.id.clone(), phase)
            })
            .collect();

        Self {
            id: config.intersection.id.clone(),
            name: config.intersection.name.clone(),
            approaches,
            phases,
            cycle: ControlCycle {
                order: config.cycle.clone(),
            },
        }
    }

    /// Intersection identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Intersection display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Approaches conflicting with `approach`, or `None` if it is unknown.
    #[must_use]
    pub fn conflicts(&self, approach: &ApproachId) -> Option<&BTreeSet<ApproachId>> {
        self.approaches.get(approach).map(|a| &a.conflicts)
    }

    /// Phases in configuration order.
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.values()
    }

    /// Default rotation.
    #[must_use]
    pub const fn cycle(&self) -> &ControlCycle {
        &self.cycle
    }

    /// Looks up a phase by identifier.
    #[must_use]
    pub fn phase(&self, id: &PhaseId) -> Option<&Phase> {
        self.phases.get(id)
    }

    /// Looks up an approach by identifier.
    #[must_use]
    pub fn approach(&self, id: &ApproachId) -> Option<&Approach> {
        self.approaches.get(id)
    }

    /// Approaches in configuration order.
    pub fn approaches(&self) -> impl Iterator<Item = &Approach> {
        self.approaches.values()
    }

    /// Returns `true` if any approach in `a` conflicts with any in `b`.
    #[must_use]
    pub fn sets_conflict(&self, a: &BTreeSet<ApproachId>, b: &BTreeSet<ApproachId>) -> bool {
        a.iter().any(|x| {
            self.conflicts(x)
                .is_some_and(|conflicts| b.iter().any(|y| conflicts.contains(y)))
        })
    }

    /// Returns `true` if no two approaches in `set` conflict and all are known.
    #[must_use]
    pub fn is_conflict_free(&self, set: &BTreeSet<ApproachId>) -> bool {
        set.iter().all(|a| self.approaches.contains_key(a)) && !self.sets_conflict(set, set)
    }

    /// Longest yellow across all phases.
    #[must_use]
    pub fn max_yellow(&self) -> Duration {
        self.phases
            .values()
            .map(|p| p.yellow)
            .max()
            .unwrap_or_default()
    }

    /// Longest all-red across all phases.
    #[must_use]
    pub fn max_all_red(&self) -> Duration {
        self.phases
            .values()
            .map(|p| p.all_red)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared topologies for unit tests across modules.

    use super::*;
    use crate::config::schema::{ApproachConfig, ConfigDuration, PhaseConfig};

    pub fn approach(id: &str, conflicts: &[&str]) -> ApproachConfig {
        ApproachConfig {
            id: id.into(),
            name: None,
            conflicts: conflicts.iter().map(|c| ApproachId::from(*c)).collect(),
            releases_into: Vec::new(),
        }
    }

    pub fn phase(id: &str, approaches: &[&str], min: u64, max: u64) -> PhaseConfig {
        PhaseConfig {
            id: id.into(),
            name: None,
            approaches: approaches.iter().map(|a| ApproachId::from(*a)).collect(),
            min_green: ConfigDuration::from_secs(min),
            max_green: ConfigDuration::from_secs(max),
            yellow: ConfigDuration::from_secs(3),
            all_red: ConfigDuration::from_secs(2),
        }
    }

    fn config(
        approaches: Vec<ApproachConfig>,
        phases: Vec<PhaseConfig>,
        cycle: &[&str],
    ) -> ControllerConfig {
        let yaml = "approaches: []\nphases: []\ncycle: []\n";
        let mut base: ControllerConfig =
            serde_yaml::from_str(yaml).expect("empty config parses");
        base.approaches = approaches;
        base.phases = phases;
        base.cycle = cycle.iter().map(|c| PhaseId::from(*c)).collect();
        base
    }

    /// Four approaches, two phases: NS and EW.
    pub fn four_way_config() -> ControllerConfig {
        config(
            vec![
                approach("N", &["E", "W"]),
                approach("S", &["E", "W"]),
                approach("E", &["N", "S"]),
                approach("W", &["N", "S"]),
            ],
            vec![
                phase("EW", &["E", "W"], 10, 60),
                phase("NS", &["N", "S"], 10, 60),
            ],
            &["NS", "EW"],
        )
    }

    /// Five approaches (N, S, E, W, NE) and three phases.
    pub fn five_way_config() -> ControllerConfig {
        config(
            vec![
                approach("N", &["E", "W", "NE"]),
                approach("S", &["E", "W", "NE"]),
                approach("E", &["N", "S", "NE"]),
                approach("W", &["N", "S", "NE"]),
                approach("NE", &["N", "S", "E", "W"]),
            ],
            vec![
                phase("NS", &["N", "S"], 10, 45),
                phase("EW", &["E", "W"], 15, 60),
                phase("NE", &["NE"], 8, 30),
            ],
            &["NS", "NE", "EW"],
        )
    }

    pub fn four_way() -> Topology {
        Topology::from_config(&four_way_config()).expect("four-way fixture is valid")
    }

    pub fn five_way() -> Topology {
        Topology::from_config(&five_way_config()).expect("five-way fixture is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<ApproachId> {
        ids.iter().map(|s| ApproachId::from(*s)).collect()
    }

    #[test]
    fn test_conflicts_lookup() {
        let topo = five_way();
        let conflicts = topo.conflicts(&"NE".into()).unwrap();
        assert_eq!(conflicts.len(), 4);
        assert!(topo.conflicts(&"X".into()).is_none());
    }

    #[test]
    fn test_phases_in_config_order() {
        let topo = five_way();
        let ids: Vec<&str> = topo.phases().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["NS", "EW", "NE"]);
    }

    #[test]
    fn test_clamp_green() {
        let topo = five_way();
        let ns = topo.phase(&"NS".into()).unwrap();
        assert_eq!(ns.clamp_green(Duration::from_secs(9)), Duration::from_secs(10));
        assert_eq!(ns.clamp_green(Duration::from_secs(46)), Duration::from_secs(45));
        assert_eq!(ns.clamp_green(Duration::from_secs(20)), Duration::from_secs(20));
    }

    #[test]
    fn test_sets_conflict() {
        let topo = five_way();
        assert!(topo.sets_conflict(&set(&["N"]), &set(&["NE"])));
        assert!(!topo.sets_conflict(&set(&["N"]), &set(&["S"])));
        assert!(topo.is_conflict_free(&set(&["N", "S"])));
        assert!(!topo.is_conflict_free(&set(&["N", "E"])));
        assert!(!topo.is_conflict_free(&set(&["N", "ghost"])));
    }

    #[test]
    fn test_cycle_positions() {
        let topo = five_way();
        let cycle = topo.cycle();
        assert_eq!(cycle.next_position(None), 0);
        assert_eq!(cycle.next_position(Some(2)), 0);
        assert_eq!(cycle.position_after(None, &"EW".into()), Some(2));
        assert_eq!(cycle.position_after(Some(2), &"NS".into()), Some(0));
        assert_eq!(cycle.position_after(Some(0), &"ghost".into()), None);
    }

    #[test]
    fn test_repeated_phase_in_cycle() {
        let mut config = four_way_config();
        config.cycle = vec!["NS".into(), "EW".into(), "NS".into()];
        let topo = Topology::from_config(&config).unwrap();
        // Searching after position 0 finds the second NS, not the first.
        assert_eq!(topo.cycle().position_after(Some(0), &"NS".into()), Some(2));
    }

    #[test]
    fn test_max_clearance_components() {
        let topo = five_way();
        assert_eq!(topo.max_yellow(), Duration::from_secs(3));
        assert_eq!(topo.max_all_red(), Duration::from_secs(2));
    }

    #[test]
    fn test_internal_conflict_fails_fast() {
        let mut config = four_way_config();
        config.phases.push(phase("bad", &["N", "E"], 10, 60));
        let err = Topology::from_config(&config).unwrap_err();
        match err {
            ConfigError::ValidationError { errors, .. } => {
                assert!(errors.iter().any(|e| e.message.contains("conflict")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn test_asymmetric_conflicts_fail_fast() {
        let mut config = four_way_config();
        config.approaches[0] = approach("N", &["E"]);
        let err = Topology::from_config(&config).unwrap_err();
        match err {
            ConfigError::ValidationError { errors, .. } => {
                assert!(errors.iter().any(|e| e.message.contains("symmetric")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }
}
