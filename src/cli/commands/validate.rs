//! `validate` command

use crate::cli::args::ValidateArgs;
use crate::config::ConfigLoader;
use crate::error::{ConfigError, GreenwaveError, Severity, ValidationIssue};

/// Validates each file, reporting every problem before failing.
///
/// # Errors
///
/// Returns the first file's error when any file is invalid, or a
/// validation error built from warnings under `--strict`.
pub fn run(args: &ValidateArgs) -> Result<(), GreenwaveError> {
    let loader = ConfigLoader::with_defaults();
    let mut first_error: Option<GreenwaveError> = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");

        let error = match loader.load(path) {
            Ok(loaded) => {
                for warning in &loaded.warnings {
                    tracing::warn!(
                        file = %path.display(),
                        location = warning.location.as_deref().unwrap_or("<unknown>"),
                        "{}",
                        warning.message
                    );
                }

                if args.strict && !loaded.warnings.is_empty() {
                    let errors = loaded
                        .warnings
                        .iter()
                        .map(|w| ValidationIssue {
                            path: w.location.clone().unwrap_or_default(),
                            message: w.message.clone(),
                            severity: Severity::Warning,
                        })
                        .collect();
                    Some(ConfigError::ValidationError {
                        path: path.display().to_string(),
                        errors,
                    })
                } else {
                    println!(
                        "{}: ok ({} approaches, {} phases, {} warnings)",
                        path.display(),
                        loaded.topology.approaches().count(),
                        loaded.topology.phases().count(),
                        loaded.warnings.len()
                    );
                    None
                }
            }
            Err(e) => Some(e),
        };

        if let Some(error) = error {
            eprintln!("{}: {error}", path.display());
            if let ConfigError::ValidationError { ref errors, .. } = error {
                for issue in errors {
                    eprintln!("  {issue}");
                }
            }
            first_error.get_or_insert(error.into());
        }
    }

    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::path::PathBuf;

    const VALID: &str = r"
intersection: { id: t1, name: T junction }
approaches:
  - { id: N, conflicts: [E] }
  - { id: S, conflicts: [E] }
  - { id: E, conflicts: [N, S] }
phases:
  - { id: NS, approaches: [N, S], min_green: 10, max_green: 40, yellow: 3, all_red: 2 }
  - { id: E, approaches: [E], min_green: 10, max_green: 40, yellow: 3, all_red: 2 }
cycle: [NS, E]
";

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_file_passes() {
        let file = write(VALID);
        let args = ValidateArgs {
            files: vec![file.path().to_path_buf()],
            strict: false,
        };
        assert!(run(&args).is_ok());
    }

    #[test]
    fn test_missing_file_fails_with_config_exit_code() {
        let args = ValidateArgs {
            files: vec![PathBuf::from("/nonexistent/site.yaml")],
            strict: false,
        };
        let err = run(&args).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_strict_turns_warnings_into_errors() {
        let with_orphan = VALID.replace("cycle: [NS, E]", "cycle: [NS]");
        let file = write(&with_orphan);

        let lenient = ValidateArgs {
            files: vec![file.path().to_path_buf()],
            strict: false,
        };
        assert!(run(&lenient).is_ok());

        let strict = ValidateArgs {
            files: vec![file.path().to_path_buf()],
            strict: true,
        };
        assert!(run(&strict).is_err());
    }
}
