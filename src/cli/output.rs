//! CLI output: text rendering of results and error mapping.

use crate::build::BuildOutcome;
use crate::config::BuildConfig;
use crate::error::CommandError;

/// Map command errors to a string for CLI output.
pub fn map_error(e: &CommandError) -> String {
    match e {
        CommandError::Build {
            error,
            cleanup_failures: 0,
        } => format!("Build failed: {}", error),
        CommandError::Build {
            error,
            cleanup_failures,
        } => format!(
            "Build failed: {}\n{} resource(s) could not be cleaned up; remove them manually.",
            error, cleanup_failures
        ),
        other => other.to_string(),
    }
}

pub fn format_build_outcome(outcome: &BuildOutcome) -> String {
    let mut lines = Vec::new();
    match &outcome.result {
        Ok(Some(artifact)) => lines.push(artifact.to_string()),
        Ok(None) => lines.push("Build finished without producing a template".to_string()),
        Err(e) => lines.push(format!("Build failed: {}", e)),
    }
    for failure in &outcome.summary.cleanup_failures {
        lines.push(format!("  cleanup of {} failed: {}", failure.step, failure.error));
    }
    lines.join("\n")
}

pub fn format_validation(config: &BuildConfig) -> String {
    let source = if !config.base_template_uuid.is_empty() {
        format!("base template {}", config.base_template_uuid)
    } else if !config.isoimage_uuid.is_empty() {
        format!("ISO image {}", config.isoimage_uuid)
    } else {
        format!("ISO image from {}", config.isoimage_url)
    };
    let mut lines = vec![
        "Configuration is valid".to_string(),
        format!("  template:  {}", config.template_name),
        format!("  server:    {} ({} cores, {} GB)", config.server_name, config.server_cores, config.server_memory),
        format!("  storage:   {} GB{}", config.storage_capacity, if config.secondary_storage { " + secondary" } else { "" }),
        format!("  source:    {}", source),
    ];
    if !config.boot_command.is_empty() {
        lines.push(format!("  boot:      {} line(s)", config.boot_command.len()));
    }
    if !config.files.is_empty() {
        lines.push(format!("  files:     {} path(s) served over HTTP", config.files.len()));
    }
    lines.join("\n")
}
