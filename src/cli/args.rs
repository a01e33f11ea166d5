//! Command line surface of the `greenwave` binary.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

/// Adaptive signal-phase controller with emergency preemption.
#[derive(Parser, Debug)]
#[command(name = "greenwave", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// More log output; repeat for debug and trace.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Skip logging setup entirely; errors still reach stderr.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// When to colour human log lines.
    #[arg(long, default_value = "auto", global = true, env = "GREENWAVE_COLOR")]
    pub color: ColorChoice,

    /// Log line format on stderr.
    #[arg(
        long,
        default_value = "human",
        global = true,
        env = "GREENWAVE_LOG_FORMAT"
    )]
    pub log_format: LogFormatChoice,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller in real time, reading records from stdin.
    Run(RunArgs),

    /// Replay a record file in virtual time.
    Simulate(SimulateArgs),

    /// Validate configuration files without running.
    Validate(ValidateArgs),

    /// Print the crate version.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the YAML intersection configuration.
    #[arg(short, long, env = "GREENWAVE_CONFIG")]
    pub config: PathBuf,

    /// Write audit events to this file instead of stderr.
    #[arg(long, env = "GREENWAVE_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Serve Prometheus metrics on 127.0.0.1:<port>.
    #[arg(long, env = "GREENWAVE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Stop once stdin reaches EOF and every record has been applied.
    #[arg(long)]
    pub exit_on_eof: bool,
}

/// Arguments for `simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Path to the YAML intersection configuration.
    #[arg(short, long, env = "GREENWAVE_CONFIG")]
    pub config: PathBuf,

    /// NDJSON record file; each record may carry a `tick` number.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Number of ticks to run. Defaults to the last scheduled tick.
    #[arg(short, long)]
    pub ticks: Option<u64>,

    /// Write audit events to this file instead of discarding them.
    #[arg(long)]
    pub events_file: Option<PathBuf>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Site files; each gets one result line.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// `--color` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Colour only when stderr is a terminal and `NO_COLOR` is unset
    #[default]
    Auto,
    Always,
    Never,
}

/// Log format choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormatChoice {
    /// Human-readable lines.
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Human => Self::Human,
            LogFormatChoice::Json => Self::Json,
        }
    }
}

/// Format of `version` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}
