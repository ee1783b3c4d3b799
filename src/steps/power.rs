//! Power steps and the shared graceful-stop routine.

use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::{BuildError, CleanupError, ProviderError};
use crate::provider::{tolerate, ResourceProvider, BENIGN_POWER_OFF};
use crate::reporter::Reporter;
use crate::step::{BuildServices, Step, StepAction};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// How a server ended up powered off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful,
    Forced,
}

/// ACPI shutdown bounded by `timeout`, falling back to a hard stop.
///
/// A 400 from either call means the server is already off.
pub async fn graceful_stop(
    provider: &dyn ResourceProvider,
    reporter: &dyn Reporter,
    server_uuid: &str,
    timeout: Duration,
) -> Result<StopOutcome, ProviderError> {
    reporter.say(&format!("Gracefully shutting down server ({})...", server_uuid));
    match tokio::time::timeout(timeout, provider.shutdown_server(server_uuid)).await {
        Ok(result) => {
            tolerate(result, BENIGN_POWER_OFF)?;
            reporter.say(&format!("Gracefully shut down server ({})", server_uuid));
            Ok(StopOutcome::Graceful)
        }
        Err(_) => {
            warn!(server = %server_uuid, ?timeout, "graceful shutdown timed out");
            reporter.say(&format!(
                "Could not gracefully shutdown server ({}). Trying to turn it off instead...",
                server_uuid
            ));
            tolerate(provider.stop_server(server_uuid).await, BENIGN_POWER_OFF)?;
            reporter.say(&format!("Successfully turned off server ({}).", server_uuid));
            Ok(StopOutcome::Forced)
        }
    }
}

fn shutdown_timeout(services: &BuildServices) -> Duration {
    Duration::from_secs(services.config.shutdown_timeout_secs)
}

/// Powers on the build server. Cleanup powers it off again if it is running.
pub struct StartServer {
    services: BuildServices,
}

impl StartServer {
    pub fn new(services: BuildServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for StartServer {
    fn name(&self) -> &'static str {
        "StartServer"
    }

    async fn run(&self, ctx: &mut ExecutionContext, _cancel: &CancelSignal) -> StepAction {
        let server = match ctx.require_id(keys::SERVER_UUID).map(str::to_string) {
            Ok(id) => id,
            Err(e) => return self.services.halt(ctx, e.into()),
        };
        self.services
            .reporter
            .say(&format!("Starting server ({})...", server));
        match self.services.provider.start_server(&server).await {
            Ok(()) => {
                info!(server = %server, "server started");
                self.services
                    .reporter
                    .say(&format!("Started server ({})", server));
                StepAction::Continue
            }
            Err(e) => self
                .services
                .halt(ctx, BuildError::provider("starting server", e)),
        }
    }

    async fn cleanup(&self, ctx: &mut ExecutionContext) -> Result<(), CleanupError> {
        let server = match ctx.optional_id(keys::SERVER_UUID)? {
            Some(id) => id.to_string(),
            None => return Ok(()),
        };
        let provider = self.services.provider.as_ref();
        match provider.server(&server).await {
            Ok(info) if !info.power => return Ok(()),
            Ok(_) => {}
            Err(e) if e.is_benign(&[404]) => return Ok(()),
            Err(e) => {
                return Err(CleanupError::provider(
                    format!("Error reading power state of server ({})", server),
                    e,
                ))
            }
        }
        graceful_stop(
            provider,
            self.services.reporter.as_ref(),
            &server,
            shutdown_timeout(&self.services),
        )
        .await
        .map(|_| ())
        .map_err(|e| CleanupError::provider(format!("Error shutting down server ({})", server), e))
    }
}

/// Powers the build server off before its disk is snapshotted.
pub struct ShutdownServer {
    services: BuildServices,
}

impl ShutdownServer {
    pub fn new(services: BuildServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for ShutdownServer {
    fn name(&self) -> &'static str {
        "ShutdownServer"
    }

    async fn run(&self, ctx: &mut ExecutionContext, _cancel: &CancelSignal) -> StepAction {
        let server = match ctx.require_id(keys::SERVER_UUID).map(str::to_string) {
            Ok(id) => id,
            Err(e) => return self.services.halt(ctx, e.into()),
        };
        match graceful_stop(
            self.services.provider.as_ref(),
            self.services.reporter.as_ref(),
            &server,
            shutdown_timeout(&self.services),
        )
        .await
        {
            Ok(outcome) => {
                info!(server = %server, ?outcome, "server powered off");
                StepAction::Continue
            }
            Err(e) => self
                .services
                .halt(ctx, BuildError::provider("shutting down server", e)),
        }
    }
}
