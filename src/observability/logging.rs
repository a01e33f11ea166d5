//! Diagnostic logging
//!
//! `tracing` output always goes to stderr so stdout can carry snapshots.
//! `GREENWAVE_LOG_LEVEL` takes any `EnvFilter` directive and beats `-v`.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

pub const LOG_LEVEL_ENV: &str = "GREENWAVE_LOG_LEVEL";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per event
    Json,
}

/// Default level for a count of `-v` flags: warn, info, debug, then trace.
#[must_use]
pub const fn level_for(verbose: u8) -> &'static str {
    const LEVELS: [&str; 4] = ["warn", "info", "debug", "trace"];
    let index = if verbose as usize >= LEVELS.len() {
        LEVELS.len() - 1
    } else {
        verbose as usize
    };
    LEVELS[index]
}

fn wants_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => {
            std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal()
        }
    }
}

/// Installs the process-wide subscriber. Later calls leave the first one
/// in place.
pub fn init_logging(format: LogFormat, verbose: u8, color: ColorChoice) {
    let filter =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new(level_for(verbose)));
    // module paths are noise below debug
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(verbose >= 2);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Human => builder.with_ansi(wants_color(color)).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}
