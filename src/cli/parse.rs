//! CLI parse: clap types for gridbake. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gridbake - build gridscale templates
#[derive(Parser)]
#[command(name = "gridbake")]
#[command(about = "Build reusable server templates on gridscale")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Build configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colored progress output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a template build
    Build,
    /// Load and validate the configuration without touching the platform
    Validate,
    /// Delete a template created by an earlier build
    DestroyTemplate {
        /// Template UUID
        uuid: String,
    },
}
