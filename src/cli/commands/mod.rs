//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod run;
pub mod simulate;
pub mod validate;
pub mod version;

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::config::{ConfigLoader, LoadResult};
use crate::error::GreenwaveError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), GreenwaveError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, cancel).await,
        Commands::Simulate(args) => simulate::run(&args, cancel).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}

/// Loads a configuration file and logs its warnings.
pub(crate) fn load_config(path: &Path) -> Result<LoadResult, GreenwaveError> {
    tracing::info!(config = %path.display(), "loading configuration");
    let loaded = ConfigLoader::with_defaults().load(path)?;

    for warning in &loaded.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }

    tracing::info!(
        intersection = loaded.topology.id(),
        approaches = loaded.topology.approaches().count(),
        phases = loaded.topology.phases().count(),
        "configuration loaded"
    );
    Ok(loaded)
}
