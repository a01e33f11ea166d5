//! Configuration schema types
//!
//! This module defines the configuration surface of the controller: the
//! intersection topology, the default rotation, per-strategy tuning and the
//! emergency preemption windows. These types are deserialized from YAML and
//! frozen after validation; nothing mutates them at runtime.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::strategy::ControlMode;
use crate::topology::{ApproachId, PhaseId};

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration for one controlled intersection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ControllerConfig {
    /// Intersection identification
    #[serde(default)]
    pub intersection: IntersectionMetadata,

    /// Approaches and their conflict sets
    pub approaches: Vec<ApproachConfig>,

    /// Phase definitions with timing bounds
    pub phases: Vec<PhaseConfig>,

    /// Default rotation of phase identifiers
    pub cycle: Vec<PhaseId>,

    /// Control loop settings
    #[serde(default)]
    pub control: ControlSettings,

    /// Per-strategy tuning
    #[serde(default)]
    pub strategies: StrategySettings,

    /// Emergency preemption settings
    #[serde(default)]
    pub emergency: EmergencySettings,
}

// ============================================================================
// Intersection Metadata
// ============================================================================

/// Intersection identification used in logs and audit events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IntersectionMetadata {
    /// Stable intersection identifier
    #[serde(default = "default_intersection_id")]
    pub id: String,

    /// Display name
    #[serde(default = "default_intersection_name")]
    pub name: String,
}

impl Default for IntersectionMetadata {
    fn default() -> Self {
        Self {
            id: default_intersection_id(),
            name: default_intersection_name(),
        }
    }
}

fn default_intersection_id() -> String {
    "polytechnic-5way".to_string()
}

fn default_intersection_name() -> String {
    "Polytechnic Roundabout".to_string()
}

// ============================================================================
// Approaches and Phases
// ============================================================================

/// One directional entry into the intersection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ApproachConfig {
    /// Approach identifier (unique)
    pub id: ApproachId,

    /// Display name (defaults to the identifier)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Approaches whose movements conflict with this one (must be symmetric)
    #[serde(default)]
    pub conflicts: Vec<ApproachId>,

    /// Downstream approaches this one discharges into, for max-pressure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub releases_into: Vec<ApproachId>,
}

/// A set of mutually non-conflicting approaches granted green together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PhaseConfig {
    /// Phase identifier (unique)
    pub id: PhaseId,

    /// Display name (defaults to the identifier)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Approaches permitted to move during this phase
    pub approaches: Vec<ApproachId>,

    /// Minimum green duration
    #[serde(default = "default_min_green")]
    pub min_green: ConfigDuration,

    /// Maximum green duration
    #[serde(default = "default_max_green")]
    pub max_green: ConfigDuration,

    /// Fixed yellow duration
    #[serde(default = "default_yellow")]
    pub yellow: ConfigDuration,

    /// Fixed all-red clearance duration
    #[serde(default = "default_all_red")]
    pub all_red: ConfigDuration,
}

const fn default_min_green() -> ConfigDuration {
    ConfigDuration::from_secs(10)
}

const fn default_max_green() -> ConfigDuration {
    ConfigDuration::from_secs(60)
}

const fn default_yellow() -> ConfigDuration {
    ConfigDuration::from_secs(3)
}

const fn default_all_red() -> ConfigDuration {
    ConfigDuration::from_secs(2)
}

// ============================================================================
// Control Loop Settings
// ============================================================================

/// Control loop cadence and buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ControlSettings {
    /// Tick period of the control loop
    #[serde(default = "default_tick")]
    pub tick: ConfigDuration,

    /// Strategy active at startup
    #[serde(default)]
    pub initial_mode: ControlMode,

    /// Capacity of the input inbox
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            initial_mode: ControlMode::default(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

const fn default_tick() -> ConfigDuration {
    ConfigDuration::from_secs(1)
}

const fn default_inbox_capacity() -> usize {
    1024
}

// ============================================================================
// Strategy Settings
// ============================================================================

/// Tuning for each control strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct StrategySettings {
    /// Fixed-timer tuning
    #[serde(default)]
    pub fixed: FixedSettings,

    /// Max-pressure tuning
    #[serde(default)]
    pub max_pressure: MaxPressureSettings,

    /// Advisory (RL) tuning
    #[serde(default)]
    pub adaptive: AdaptiveSettings,
}

/// Fixed-timer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FixedSettings {
    /// Green duration proposed for every phase
    #[serde(default = "default_fixed_green")]
    pub green: ConfigDuration,
}

impl Default for FixedSettings {
    fn default() -> Self {
        Self {
            green: default_fixed_green(),
        }
    }
}

const fn default_fixed_green() -> ConfigDuration {
    ConfigDuration::from_secs(30)
}

/// Max-pressure tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct MaxPressureSettings {
    /// Green duration before any pressure extension
    #[serde(default = "default_base_green")]
    pub base_green: ConfigDuration,

    /// Extension granted per unit of winning pressure
    #[serde(default = "default_extension_per_vehicle")]
    pub extension_per_vehicle: ConfigDuration,

    /// Upper bound on the pressure extension
    #[serde(default = "default_max_extension")]
    pub max_extension: ConfigDuration,
}

impl Default for MaxPressureSettings {
    fn default() -> Self {
        Self {
            base_green: default_base_green(),
            extension_per_vehicle: default_extension_per_vehicle(),
            max_extension: default_max_extension(),
        }
    }
}

const fn default_base_green() -> ConfigDuration {
    ConfigDuration::from_secs(15)
}

const fn default_extension_per_vehicle() -> ConfigDuration {
    ConfigDuration::from_secs(1)
}

const fn default_max_extension() -> ConfigDuration {
    ConfigDuration::from_secs(20)
}

/// Advisory (RL) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct AdaptiveSettings {
    /// Minimum advisory confidence accepted verbatim
    #[serde(default = "default_rl_confidence")]
    pub confidence_threshold: f64,

    /// Age after which a buffered advisory counts as stale
    #[serde(default = "default_advisory_max_age")]
    pub advisory_max_age: ConfigDuration,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_rl_confidence(),
            advisory_max_age: default_advisory_max_age(),
        }
    }
}

const fn default_rl_confidence() -> f64 {
    0.7
}

const fn default_advisory_max_age() -> ConfigDuration {
    ConfigDuration::from_secs(5)
}

// ============================================================================
// Emergency Settings
// ============================================================================

/// Emergency preemption windows and thresholds.
///
/// Documented operating bands: `green_window` 25–30s, `recovery` 2–20s.
/// Values outside these bands load with a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct EmergencySettings {
    /// Minimum detection confidence that raises an emergency
    #[serde(default = "default_emergency_confidence")]
    pub confidence_threshold: f64,

    /// All-red clearance before preemptive green; defaults to the vacated
    /// phase's all-red and is never shorter than it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clearance: Option<ConfigDuration>,

    /// Preemptive green window
    #[serde(default = "default_green_window")]
    pub green_window: ConfigDuration,

    /// Extension applied each time the window ends with the flag still set
    #[serde(default = "default_window_extension")]
    pub extension: ConfigDuration,

    /// Hard cap on preemptive green
    #[serde(default = "default_max_window")]
    pub max_window: ConfigDuration,

    /// All-red recovery after preemptive green
    #[serde(default = "default_recovery")]
    pub recovery: ConfigDuration,

    /// Clear an approach's emergency flag when no detection refresh arrives
    /// for this long; unset means the flag holds until explicitly cleared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_hold: Option<ConfigDuration>,

    /// Number of resolved events retained for audit
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for EmergencySettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_emergency_confidence(),
            clearance: None,
            green_window: default_green_window(),
            extension: default_window_extension(),
            max_window: default_max_window(),
            recovery: default_recovery(),
            detection_hold: None,
            history_limit: default_history_limit(),
        }
    }
}

const fn default_emergency_confidence() -> f64 {
    0.8
}

const fn default_green_window() -> ConfigDuration {
    ConfigDuration::from_secs(28)
}

const fn default_window_extension() -> ConfigDuration {
    ConfigDuration::from_secs(5)
}

const fn default_max_window() -> ConfigDuration {
    ConfigDuration::from_secs(60)
}

const fn default_recovery() -> ConfigDuration {
    ConfigDuration::from_secs(3)
}

const fn default_history_limit() -> usize {
    256
}

// ============================================================================
// Durations
// ============================================================================

/// A duration written either as integer seconds (`30`) or as a
/// `humantime` string (`"2500ms"`, `"1m 30s"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigDuration(Duration);

impl ConfigDuration {
    /// Creates a duration from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Creates a duration from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Returns the wrapped duration.
    #[must_use]
    pub const fn get(self) -> Duration {
        self.0
    }
}

impl From<Duration> for ConfigDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<ConfigDuration> for Duration {
    fn from(value: ConfigDuration) -> Self {
        value.0
    }
}

impl fmt::Display for ConfigDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl Serialize for ConfigDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = ConfigDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("whole seconds or a duration string such as \"2500ms\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ConfigDuration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(ConfigDuration::from_secs)
                    .map_err(|_| E::custom(format!("duration must not be negative, got {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Duration::try_from_secs_f64(v)
                    .map(ConfigDuration)
                    .map_err(|e| E::custom(format!("invalid duration {v}: {e}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                humantime::parse_duration(v.trim())
                    .map(ConfigDuration)
                    .map_err(|e| E::custom(format!("invalid duration '{v}': {e}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        d: ConfigDuration,
    }

    fn parse(yaml: &str) -> Result<Duration, serde_yaml::Error> {
        serde_yaml::from_str::<Holder>(yaml).map(|h| h.d.get())
    }

    #[test]
    fn test_duration_integer_seconds() {
        assert_eq!(parse("d: 28").unwrap(), Duration::from_secs(28));
    }

    #[test]
    fn test_duration_humantime_string() {
        assert_eq!(parse("d: 2500ms").unwrap(), Duration::from_millis(2500));
        assert_eq!(parse("d: \"1m 30s\"").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_duration_fractional_seconds() {
        assert_eq!(parse("d: 1.5").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_duration_negative_rejected() {
        assert!(parse("d: -3").is_err());
    }

    #[test]
    fn test_duration_garbage_rejected() {
        assert!(parse("d: soon").is_err());
    }

    #[test]
    fn test_duration_serializes_as_humantime() {
        let text = serde_json::to_string(&ConfigDuration::from_millis(2500)).unwrap();
        assert_eq!(text, "\"2s 500ms\"");
    }

    #[test]
    fn test_minimal_config_defaults() {
        let yaml = r"
approaches:
  - id: north
    conflicts: [east]
  - id: east
    conflicts: [north]
phases:
  - id: n
    approaches: [north]
  - id: e
    approaches: [east]
cycle: [n, e]
";
        let config: ControllerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.intersection.id, "polytechnic-5way");
        assert_eq!(config.control.tick.get(), Duration::from_secs(1));
        assert_eq!(config.control.initial_mode, ControlMode::Fixed);
        assert_eq!(config.phases[0].min_green.get(), Duration::from_secs(10));
        assert_eq!(config.phases[0].max_green.get(), Duration::from_secs(60));
        assert!((config.strategies.adaptive.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert!((config.emergency.confidence_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.emergency.green_window.get(), Duration::from_secs(28));
        assert!(config.emergency.clearance.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r"
approaches: []
phases: []
cycle: []
bogus: 1
";
        assert!(serde_yaml::from_str::<ControllerConfig>(yaml).is_err());
    }
}
