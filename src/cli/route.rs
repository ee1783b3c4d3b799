//! CLI route: single route table and run context. Dispatches to the builder and the provider.

use crate::artifact::Artifact;
use crate::build::Builder;
use crate::cancel::CancelSignal;
use crate::cli::output::{format_build_outcome, format_validation};
use crate::cli::parse::Commands;
use crate::config::{BuildConfig, ConfigLoader};
use crate::error::CommandError;
use crate::provider::{GridscaleClient, GridscaleSettings, ResourceProvider};
use crate::remote::{RemoteControlChannel, UnavailableRemoteChannel};
use crate::reporter::{ConsoleReporter, Reporter};
use crate::step::BuildServices;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Runtime context for CLI execution: config path and output settings.
pub struct RunContext {
    config_path: Option<PathBuf>,
    reporter: Arc<dyn Reporter>,
    remote: Arc<dyn RemoteControlChannel>,
}

impl RunContext {
    pub fn new(config_path: Option<PathBuf>, color: bool) -> Self {
        Self {
            config_path,
            reporter: Arc::new(ConsoleReporter::new("gridscale", color)),
            remote: Arc::new(UnavailableRemoteChannel),
        }
    }

    /// Replace the remote control channel used for console and SSH work.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteControlChannel>) -> Self {
        self.remote = remote;
        self
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands, cancel: &CancelSignal) -> Result<String, CommandError> {
        let started = Instant::now();
        let result = match command {
            Commands::Build => self.handle_build(cancel).await,
            Commands::Validate => self.handle_validate(),
            Commands::DestroyTemplate { uuid } => self.handle_destroy_template(uuid).await,
        };
        info!(
            command = command_name(command),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "command finished"
        );
        result
    }

    fn load(&self) -> Result<BuildConfig, CommandError> {
        Ok(ConfigLoader::load_validated(self.config_path.as_deref())?)
    }

    fn provider(config: &BuildConfig) -> Result<Arc<dyn ResourceProvider>, CommandError> {
        let settings = GridscaleSettings::from_build_config(config)?;
        Ok(Arc::new(GridscaleClient::new(settings)?))
    }

    async fn handle_build(&self, cancel: &CancelSignal) -> Result<String, CommandError> {
        let config = self.load()?;
        let provider = Self::provider(&config)?;
        let services = BuildServices::new(
            provider,
            Arc::clone(&self.remote),
            Arc::clone(&self.reporter),
            Arc::new(config),
        );
        let outcome = Builder::new(services, None).run(cancel).await?;
        let cleanup_failures = outcome.summary.cleanup_failures.len();
        let text = format_build_outcome(&outcome);
        match outcome.result {
            Ok(_) => Ok(text),
            Err(error) => Err(CommandError::Build {
                error,
                cleanup_failures,
            }),
        }
    }

    fn handle_validate(&self) -> Result<String, CommandError> {
        let config = self.load()?;
        Ok(format_validation(&config))
    }

    async fn handle_destroy_template(&self, uuid: &str) -> Result<String, CommandError> {
        let config = self.load()?;
        let provider = Self::provider(&config)?;
        let artifact = Artifact::new(String::new(), uuid);
        self.reporter
            .say(&format!("Deleting template ({})...", uuid));
        artifact.destroy(provider.as_ref()).await?;
        Ok(format!("Deleted template {}", uuid))
    }
}

/// Stable command name for logs.
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Build => "build",
        Commands::Validate => "validate",
        Commands::DestroyTemplate { .. } => "destroy-template",
    }
}
