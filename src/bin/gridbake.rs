//! gridbake CLI Binary
//!
//! Command-line interface for building gridscale templates.

use anyhow::Context;
use clap::Parser;
use gridbake::cancel::cancel_pair;
use gridbake::cli::{Cli, RunContext};
use gridbake::config::ConfigLoader;
use gridbake::logging::{init_logging, LoggingConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{:#}", e);
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    init_logging(Some(&logging_config)).context("Failed to initialize logging")?;
    info!("gridbake CLI starting");

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            handle.cancel();
        }
    });

    let context = RunContext::new(cli.config.clone(), !cli.no_color);
    match context.execute(&cli.command, &signal).await {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", gridbake::cli::map_error(&e));
            process::exit(1);
        }
    }
}

/// Build logging configuration from CLI args, environment, and config file
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    // Without --verbose only explicit flags turn logging on.
    if !cli.verbose && cli.log_level.is_none() {
        return LoggingConfig {
            level: "off".to_string(),
            ..LoggingConfig::default()
        };
    }

    let mut config = ConfigLoader::load(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();

    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    } else if config.level == "warn" {
        config.level = "info".to_string();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    } else if config.file == PathBuf::from("gridbake.log") {
        // Resolve the default log file to the user data directory
        if let Some(dirs) = directories::ProjectDirs::from("io", "gridscale", "gridbake") {
            config.file = dirs.data_dir().join("gridbake.log");
        }
    }

    config
}
