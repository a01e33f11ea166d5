//! Site configuration loading
//!
//! Text goes through `${VAR}` expansion first, so an expanded number is
//! still a YAML number. The parsed document is then deserialized, checked
//! by the [`Validator`] and frozen into a shared [`Topology`].

use std::path::Path;
use std::sync::Arc;

use crate::config::schema::ControllerConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;
use crate::topology::Topology;

/// Loader tuning.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Caps enforced while loading.
    pub config_limits: ConfigLimits,
}

/// Upper bounds on what a single site file may declare.
///
/// Each bound can be raised through its `GREENWAVE_MAX_*` variable.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// `GREENWAVE_MAX_APPROACHES`, default 64
    pub max_approaches: usize,
    /// `GREENWAVE_MAX_PHASES`, default 64
    pub max_phases: usize,
    /// `GREENWAVE_MAX_CONFIG_SIZE` in bytes, default 1 MiB
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_approaches: limit_from_env("GREENWAVE_MAX_APPROACHES").unwrap_or(64),
            max_phases: limit_from_env("GREENWAVE_MAX_PHASES").unwrap_or(64),
            max_config_size: limit_from_env("GREENWAVE_MAX_CONFIG_SIZE").unwrap_or(1 << 20),
        }
    }
}

fn limit_from_env(var: &str) -> Option<usize> {
    std::env::var(var).ok()?.trim().parse().ok()
}

/// A validated site, ready to hand to the controller.
#[derive(Debug)]
pub struct LoadResult {
    pub config: Arc<ControllerConfig>,
    pub topology: Arc<Topology>,
    /// Non-fatal findings: unset variables and validator warnings
    pub warnings: Vec<LoadWarning>,
}

/// Something worth logging that did not stop the load.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    pub message: String,
    /// Field path or file the warning refers to
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

/// Reads site files into a [`LoadResult`].
#[derive(Debug)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Loader with limits taken from the environment.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LoaderOptions::default())
    }

    /// Reads, expands, parses and validates the file at `path`.
    ///
    /// # Errors
    ///
    /// `MissingFile` when the file cannot be read, `InvalidValue` when it
    /// is over the size cap, `EnvVarNotSet` for an unset `${VAR:?msg}`,
    /// `ParseError` for bad YAML and `ValidationError` with every issue
    /// the validator found.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let missing = || ConfigError::MissingFile {
            path: path.to_path_buf(),
        };

        let size = std::fs::metadata(path).map_err(|_| missing())?.len();
        let cap = self.options.config_limits.max_config_size;
        if usize::try_from(size).map_or(true, |size| size > cap) {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{size} bytes"),
                expected: format!("at most {cap} bytes"),
            });
        }

        let text = std::fs::read_to_string(path).map_err(|_| missing())?;
        self.build(&text, path)
    }

    /// Same as [`ConfigLoader::load`] on in-memory text. `origin` only
    /// labels errors and warnings.
    ///
    /// # Errors
    ///
    /// Everything `load` reports except the file-level errors.
    pub fn load_str(&self, yaml: &str, origin: &str) -> Result<LoadResult, ConfigError> {
        self.build(yaml, Path::new(origin))
    }

    fn build(&self, text: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        let text = text.trim_start_matches('\u{feff}');
        let Expanded {
            text,
            mut warnings,
        } = expand_env(text, origin)?;

        let parse_error = |e: serde_yaml::Error, prefix: &str| ConfigError::ParseError {
            path: origin.to_path_buf(),
            line: e.location().map(|at| at.line()),
            message: format!("{prefix}{e}"),
        };

        let document: serde_yaml::Value =
            serde_yaml::from_str(&text).map_err(|e| parse_error(e, ""))?;
        if document.is_null() {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: "Configuration file is empty".to_string(),
            });
        }
        let config: ControllerConfig = serde_yaml::from_value(document)
            .map_err(|e| parse_error(e, "Failed to deserialize configuration: "))?;

        let report = Validator::new().validate(&config, &self.options.config_limits);
        if report.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: report.errors,
            });
        }
        warnings.extend(report.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        let topology = Topology::from_validated(&config);
        Ok(LoadResult {
            config: Arc::new(config),
            topology: Arc::new(topology),
            warnings,
        })
    }
}

// ============================================================================
// ${VAR} expansion
// ============================================================================

struct Expanded {
    text: String,
    warnings: Vec<LoadWarning>,
}

/// What to do when the referenced variable is unset.
enum Unset<'a> {
    /// `${VAR}`: empty string plus a warning
    Blank,
    /// `${VAR:-fallback}`
    Fallback(&'a str),
    /// `${VAR:?message}`
    Fail(&'a str),
}

fn split_reference(body: &str) -> (&str, Unset<'_>) {
    if let Some((name, tail)) = body.split_once(':') {
        if let Some(fallback) = tail.strip_prefix('-') {
            return (name, Unset::Fallback(fallback));
        }
        if let Some(message) = tail.strip_prefix('?') {
            return (name, Unset::Fail(message));
        }
    }
    (body, Unset::Blank)
}

/// Byte offset of the `}` closing a reference whose `${` has already been
/// consumed. Braces inside a fallback nest.
fn closing_brace(rest: &str) -> Option<usize> {
    let mut open = 0usize;
    for (at, c) in rest.char_indices() {
        match c {
            '{' => open += 1,
            '}' if open == 0 => return Some(at),
            '}' => open -= 1,
            _ => {}
        }
    }
    None
}

/// Expands `${VAR}`, `${VAR:-fallback}` and `${VAR:?message}` in raw text.
/// `$$` is a literal dollar; any other `$` is left alone.
fn expand_env(raw: &str, origin: &Path) -> Result<Expanded, ConfigError> {
    let mut text = String::with_capacity(raw.len());
    let mut warnings = Vec::new();
    let mut rest = raw;

    while let Some(dollar) = rest.find('$') {
        text.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            text.push('$');
            rest = tail;
            continue;
        }
        let Some(body_and_tail) = after.strip_prefix('{') else {
            text.push('$');
            rest = after;
            continue;
        };

        let Some(close) = closing_brace(body_and_tail) else {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: format!(
                    "Unclosed environment variable reference: ${{{}",
                    body_and_tail.lines().next().unwrap_or_default()
                ),
            });
        };
        let (name, unset) = split_reference(&body_and_tail[..close]);
        rest = &body_and_tail[close + 1..];

        match (std::env::var(name), unset) {
            (Ok(value), _) => text.push_str(&value),
            (Err(_), Unset::Fallback(fallback)) => text.push_str(fallback),
            (Err(_), Unset::Fail(message)) => {
                return Err(ConfigError::EnvVarNotSet {
                    var: name.to_string(),
                    location: message.to_string(),
                });
            }
            (Err(_), Unset::Blank) => warnings.push(LoadWarning {
                message: format!("Environment variable '{name}' is not set, using empty string"),
                location: Some(origin.display().to_string()),
            }),
        }
    }
    text.push_str(rest);

    Ok(Expanded { text, warnings })
}
