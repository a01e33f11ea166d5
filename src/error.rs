//! Error types for `greenwave`
//!
//! Startup failures (bad topology, unreadable files) are hard errors with
//! their own exit codes. Runtime misbehaviour of collaborators is never an
//! error here: the control loop corrects it and reports a [`Correction`] or a
//! fallback instead.
//!
//! [`Correction`]: crate::signal::Correction

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Process exit codes of the `greenwave` binary.
pub struct ExitCode;

impl ExitCode {
    /// Clean exit, including a graceful shutdown on the first signal
    pub const SUCCESS: i32 = 0;

    /// Unclassified failure
    pub const ERROR: i32 = 1;

    /// Site configuration rejected
    pub const CONFIG_ERROR: i32 = 2;

    /// A file or stream could not be read or written
    pub const IO_ERROR: i32 = 3;

    /// Record stream unusable
    pub const FEED_ERROR: i32 = 4;

    /// State machine misuse
    pub const PHASE_ERROR: i32 = 5;

    /// Bad command line (clap reports these itself)
    pub const USAGE_ERROR: i32 = 64;

    /// Forced exit on a second SIGINT
    pub const INTERRUPTED: i32 = 130;

    /// Forced exit on a second SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Any error surfaced by a CLI command.
#[derive(Debug, Error)]
pub enum GreenwaveError {
    /// Site configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// State machine API misuse
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// Record stream failure
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Filesystem or stdio failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or record serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raw YAML failure outside the loader
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GreenwaveError {
    /// Exit code the binary terminates with.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Feed(_) | Self::Json(_) => ExitCode::FEED_ERROR,
            Self::Phase(_) => ExitCode::PHASE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Why a site configuration was refused.
///
/// Every variant is fatal at startup; none is recovered at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Not YAML, or not the expected shape
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Configuration file
        path: PathBuf,
        /// 1-based line, when the parser knows it
        line: Option<usize>,
        /// Parser message
        message: String,
    },

    /// Topology or timing rules broken; carries every issue found
    #[error("validation failed for {path}: {}", summarize(.errors))]
    ValidationError {
        /// Configuration file, or the origin given to `load_str`
        path: String,
        /// Errors, plus warnings when `--strict` promotes them
        errors: Vec<ValidationIssue>,
    },

    /// Configuration file missing or unreadable
    #[error("file not found: {path}")]
    MissingFile {
        /// Path as given
        path: PathBuf,
    },

    /// A loader limit was exceeded
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Limited quantity
        field: String,
        /// Observed value
        value: String,
        /// Accepted range
        expected: String,
    },

    /// `${VAR:?message}` referenced an unset variable
    #[error("environment variable '{var}' not set ({location})")]
    EnvVarNotSet {
        /// Variable name
        var: String,
        /// Message supplied with the reference
        location: String,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    match errors {
        [] => "no issues recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

// ============================================================================
// Validation Types
// ============================================================================

/// One finding of the configuration validator.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Field path, e.g. `phases[2].approaches`
    pub path: String,
    /// What is wrong
    pub message: String,
    /// Whether it blocks loading
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{level}: {} at {}", self.message, self.path)
    }
}

/// Validation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks loading
    Error,
    /// Logged; fatal only under `validate --strict`
    Warning,
}

// ============================================================================
// Phase State Machine Errors
// ============================================================================

/// Misuse of the phase state machine API.
///
/// The control loop never triggers these; they guard direct callers.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// A decision was submitted while a mandatory interval is still running
    #[error("cannot commit a phase during {sub_state}: {remaining_ms}ms of clearance remain")]
    ClearanceInProgress {
        /// Current sub-state name
        sub_state: String,
        /// Remaining mandatory time in milliseconds
        remaining_ms: u64,
    },

    /// Neither the requested phase nor a rotation substitute exists
    #[error("no phase '{0}' and no substitute in the cycle")]
    NotFound(String),
}

// ============================================================================
// Feed Errors
// ============================================================================

/// Errors raised while reading the NDJSON input feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A line could not be parsed as an input record
    #[error("malformed record on line {line}: {message}")]
    Malformed {
        /// 1-based line number in the feed
        line: usize,
        /// Parser message
        message: String,
    },

    /// The inbox is at capacity; the record was not accepted
    #[error("inbox full")]
    InboxFull,

    /// The inbox was closed before the feed finished
    #[error("inbox closed")]
    InboxClosed,

    /// I/O error while reading the feed
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for `greenwave` operations.
pub type Result<T> = std::result::Result<T, GreenwaveError>;
