use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::BuildError;
use crate::provider::{tolerate, BENIGN_UNLINK};
use crate::step::{BuildServices, Step, StepAction};
use crate::steps::power::graceful_stop;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

const ISO_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Ends an ISO installation: ejects the ISO image, power cycles the server
/// and boots it from the installed disk.
///
/// The link flag is left alone; the link step's own cleanup treats the
/// already-removed relation as benign.
pub struct FinishIsoInstallation {
    services: BuildServices,
}

impl FinishIsoInstallation {
    pub fn new(services: BuildServices) -> Self {
        Self { services }
    }

    async fn finish(&self, ctx: &ExecutionContext) -> Result<(), BuildError> {
        let provider = self.services.provider.as_ref();
        let reporter = self.services.reporter.as_ref();
        let server = ctx.require_id(keys::SERVER_UUID)?;
        let iso = ctx.require_id(keys::ISO_IMAGE_UUID)?;

        reporter.say(&format!(
            "Removing ISO image ({}) from server ({})...",
            iso, server
        ));
        tolerate(provider.unlink_iso_image(server, iso).await, BENIGN_UNLINK)
            .map_err(|e| BuildError::provider("removing ISO image from server", e))?;

        graceful_stop(provider, reporter, server, ISO_SHUTDOWN_TIMEOUT)
            .await
            .map_err(|e| BuildError::provider("shutting down server", e))?;

        reporter.say(&format!("Starting server ({})...", server));
        provider
            .start_server(server)
            .await
            .map_err(|e| BuildError::provider("starting server", e))?;
        info!(server = %server, iso = %iso, "ISO installation finished");
        Ok(())
    }
}

#[async_trait]
impl Step for FinishIsoInstallation {
    fn name(&self) -> &'static str {
        "FinishIsoInstallation"
    }

    async fn run(&self, ctx: &mut ExecutionContext, _cancel: &CancelSignal) -> StepAction {
        if !self.services.config.iso_requested() {
            debug!("no ISO image requested");
            return StepAction::Continue;
        }
        match ctx.optional_id(keys::ISO_IMAGE_UUID) {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("no ISO image id recorded");
                return StepAction::Continue;
            }
            Err(e) => return self.services.halt(ctx, e.into()),
        }
        match ctx.link_state(keys::SERVER_ISO_IMAGE_LINKED) {
            Ok(state) if state.is_linked() => {}
            Ok(state) => {
                debug!(?state, "ISO image not linked");
                return StepAction::Continue;
            }
            Err(e) => return self.services.halt(ctx, e.into()),
        }

        match self.finish(ctx).await {
            Ok(()) => StepAction::Continue,
            Err(err) => self.services.halt(ctx, err),
        }
    }
}
