use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::BuildError;
use crate::step::{BuildServices, Step, StepAction};
use async_trait::async_trait;
use tracing::info;

/// Finds the platform's public network. Nothing is created, so nothing is cleaned.
pub struct LookupPublicNetwork {
    services: BuildServices,
}

impl LookupPublicNetwork {
    pub fn new(services: BuildServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for LookupPublicNetwork {
    fn name(&self) -> &'static str {
        "LookupPublicNetwork"
    }

    fn produces(&self) -> Vec<&'static str> {
        vec![keys::PUBLIC_NETWORK_UUID]
    }

    async fn run(&self, ctx: &mut ExecutionContext, _cancel: &CancelSignal) -> StepAction {
        self.services.reporter.say("Getting public network UUID...");
        match self.services.provider.public_network().await {
            Ok(uuid) => {
                info!(uuid = %uuid, "public network found");
                self.services
                    .reporter
                    .say(&format!("Public network UUID: {}", uuid));
                ctx.put(keys::PUBLIC_NETWORK_UUID, uuid);
                StepAction::Continue
            }
            Err(e) => self
                .services
                .halt(ctx, BuildError::provider("getting public network", e)),
        }
    }
}
