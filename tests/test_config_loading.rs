//! Loading site configurations from disk.

mod common;

use std::io::Write as _;
use std::time::Duration;

use greenwave::config::ConfigLoader;
use greenwave::error::{ConfigError, GreenwaveError};
use greenwave::strategy::ControlMode;
use greenwave::topology::{ApproachId, PhaseId};
use tempfile::NamedTempFile;

const TEE: &str = r"
intersection: { id: mill-lane, name: Mill Lane T }
approaches:
  - { id: N, conflicts: [E] }
  - { id: S, conflicts: [E] }
  - { id: E, conflicts: [N, S] }
phases:
  - { id: NS, approaches: [N, S], min_green: 10, max_green: 40 }
  - { id: E, approaches: [E], min_green: 8, max_green: 30 }
cycle: [NS, E]
";

fn write(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn load_text(content: &str) -> Result<greenwave::config::LoadResult, ConfigError> {
    let file = write(content);
    ConfigLoader::with_defaults().load(file.path())
}

fn messages(err: &ConfigError) -> Vec<String> {
    match err {
        ConfigError::ValidationError { errors, .. } => {
            errors.iter().map(|e| e.message.clone()).collect()
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn fixtures_load_cleanly() {
    for name in ["four_way.yaml", "five_way.yaml"] {
        let loaded = common::load(name);
        assert!(loaded.warnings.is_empty(), "{name}: {:?}", loaded.warnings);
    }

    let five = common::load("five_way.yaml");
    assert_eq!(five.topology.phases().count(), 3);
    assert_eq!(five.config.control.initial_mode, ControlMode::Fixed);
    let ew = five.topology.phase(&PhaseId::from("EW")).unwrap();
    assert_eq!(ew.yellow, Duration::from_secs(4));
    assert!(!five
        .topology
        .is_conflict_free(&[ApproachId::from("NE"), ApproachId::from("N")].into_iter().collect()));
}

#[test]
fn omitted_sections_take_defaults() {
    let loaded = load_text(TEE).unwrap();
    let config = &loaded.config;
    assert_eq!(config.control.tick.get(), Duration::from_secs(1));
    assert_eq!(config.strategies.fixed.green.get(), Duration::from_secs(30));
    assert_eq!(config.emergency.green_window.get(), Duration::from_secs(28));
    assert!((config.emergency.confidence_threshold - 0.8).abs() < f64::EPSILON);

    let ns = loaded.topology.phase(&PhaseId::from("NS")).unwrap();
    assert_eq!(ns.yellow, Duration::from_secs(3));
    assert_eq!(ns.all_red, Duration::from_secs(2));
}

#[test]
fn environment_defaults_are_substituted() {
    let text = TEE.replace(
        "min_green: 8, max_green: 30",
        "min_green: ${GREENWAVE_IT_UNSET_E_MIN:-12}, max_green: 30",
    );
    let loaded = load_text(&text).unwrap();
    let e = loaded.topology.phase(&PhaseId::from("E")).unwrap();
    assert_eq!(e.min_green, Duration::from_secs(12));
}

#[test]
fn required_environment_variable_fails_load() {
    let text = TEE.replace("max_green: 40", "max_green: ${GREENWAVE_IT_UNSET_NS_MAX:?need NS max}");
    let err = load_text(&text).unwrap_err();
    assert!(matches!(err, ConfigError::EnvVarNotSet { ref var, .. } if var == "GREENWAVE_IT_UNSET_NS_MAX"));
    assert_eq!(
        GreenwaveError::from(err).exit_code(),
        greenwave::error::ExitCode::CONFIG_ERROR
    );
}

#[test]
fn every_problem_is_reported_at_once() {
    let text = TEE
        .replace("- { id: E, conflicts: [N, S] }", "- { id: E, conflicts: [N] }")
        .replace("min_green: 8, max_green: 30", "min_green: 40, max_green: 30")
        .replace("cycle: [NS, E]", "cycle: [NS, EE]");
    let err = load_text(&text).unwrap_err();
    let messages = messages(&err);

    assert!(messages.iter().any(|m| m.contains("not symmetric")), "{messages:?}");
    assert!(messages.iter().any(|m| m.contains("exceeds max_green")), "{messages:?}");
    assert!(
        messages.iter().any(|m| m.contains("Unknown phase 'EE' (did you mean 'E'?)")),
        "{messages:?}"
    );
}

#[test]
fn internally_conflicting_phase_is_rejected() {
    let text = TEE.replace("approaches: [N, S], min_green", "approaches: [N, E], min_green");
    let err = load_text(&text).unwrap_err();
    assert!(
        messages(&err)
            .iter()
            .any(|m| m.contains("internally conflicting approaches 'E' and 'N'"))
    );
}

#[test]
fn window_outside_band_is_a_warning() {
    let text = format!("{TEE}\nemergency:\n  green_window: 40\n  max_window: 60\n");
    let loaded = load_text(&text).unwrap();
    assert!(
        loaded
            .warnings
            .iter()
            .any(|w| w.location.as_deref() == Some("emergency.green_window"))
    );
}

#[test]
fn malformed_yaml_reports_parse_error() {
    let err = load_text("approaches: [N, S\n").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));

    let err = load_text("").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { ref message, .. } if message.contains("empty")));
}
