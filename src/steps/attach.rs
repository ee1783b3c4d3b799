//! Generic link step: relates the build server to another resource.
//!
//! The link outcome is recorded as a [`LinkState`]. Only a confirmed link is
//! ever unlinked during cleanup.

use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext, LinkState};
use crate::error::{BuildError, CleanupError, ContextError, ProviderError};
use crate::provider::{tolerate, ResourceProvider, BENIGN_UNLINK};
use crate::step::{BuildServices, Step, StepAction};
use crate::steps::Condition;
use async_trait::async_trait;
use tracing::{debug, info};

/// What an [`Attach`] step links the server to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    BootStorage,
    SecondaryStorage,
    IpAddress,
    PublicNetwork,
    IsoImage,
}

impl Relation {
    /// Context key holding the id of the resource being linked.
    pub fn target_key(self) -> &'static str {
        match self {
            Relation::BootStorage => keys::BOOT_STORAGE_UUID,
            Relation::SecondaryStorage => keys::SECONDARY_STORAGE_UUID,
            Relation::IpAddress => keys::IP_ADDR_UUID,
            Relation::PublicNetwork => keys::PUBLIC_NETWORK_UUID,
            Relation::IsoImage => keys::ISO_IMAGE_UUID,
        }
    }

    /// Context key holding the link state.
    pub fn linked_key(self) -> &'static str {
        match self {
            Relation::BootStorage => keys::SERVER_BOOT_STORAGE_LINKED,
            Relation::SecondaryStorage => keys::SERVER_SECONDARY_STORAGE_LINKED,
            Relation::IpAddress => keys::SERVER_IP_ADDR_LINKED,
            Relation::PublicNetwork => keys::SERVER_PUBLIC_NETWORK_LINKED,
            Relation::IsoImage => keys::SERVER_ISO_IMAGE_LINKED,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Relation::BootStorage => "boot storage",
            Relation::SecondaryStorage => "secondary storage",
            Relation::IpAddress => "IP address",
            Relation::PublicNetwork => "public network",
            Relation::IsoImage => "ISO image",
        }
    }

    pub fn step_name(self) -> &'static str {
        match self {
            Relation::BootStorage => "LinkBootStorage",
            Relation::SecondaryStorage => "LinkSecondaryStorage",
            Relation::IpAddress => "LinkIpAddress",
            Relation::PublicNetwork => "LinkPublicNetwork",
            Relation::IsoImage => "LinkIsoImage",
        }
    }

    pub fn condition(self) -> Condition {
        match self {
            Relation::SecondaryStorage => Condition::SecondaryStorage,
            Relation::IsoImage => Condition::IsoRequested,
            _ => Condition::Always,
        }
    }

    /// A missing target means "nothing to link" instead of a broken context.
    fn target_optional(self) -> bool {
        matches!(self, Relation::IsoImage)
    }

    async fn link(self, provider: &dyn ResourceProvider, server: &str, target: &str) -> Result<(), ProviderError> {
        match self {
            Relation::BootStorage => provider.link_storage(server, target, true).await,
            Relation::SecondaryStorage => provider.link_storage(server, target, false).await,
            Relation::IpAddress => provider.link_ip(server, target).await,
            Relation::PublicNetwork => provider.link_network(server, target).await,
            Relation::IsoImage => provider.link_iso_image(server, target).await,
        }
    }

    async fn unlink(self, provider: &dyn ResourceProvider, server: &str, target: &str) -> Result<(), ProviderError> {
        let result = match self {
            Relation::BootStorage | Relation::SecondaryStorage => {
                provider.unlink_storage(server, target).await
            }
            Relation::IpAddress => provider.unlink_ip(server, target).await,
            Relation::PublicNetwork => provider.unlink_network(server, target).await,
            Relation::IsoImage => provider.unlink_iso_image(server, target).await,
        };
        tolerate(result, BENIGN_UNLINK)
    }
}

pub struct Attach {
    relation: Relation,
    services: BuildServices,
}

impl Attach {
    pub fn new(relation: Relation, services: BuildServices) -> Self {
        Self { relation, services }
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    fn target<'a>(&self, ctx: &'a ExecutionContext) -> Result<Option<&'a str>, ContextError> {
        if self.relation.target_optional() {
            ctx.optional_id(self.relation.target_key())
        } else {
            ctx.require_id(self.relation.target_key()).map(Some)
        }
    }
}

#[async_trait]
impl Step for Attach {
    fn name(&self) -> &'static str {
        self.relation.step_name()
    }

    fn produces(&self) -> Vec<&'static str> {
        vec![self.relation.linked_key()]
    }

    async fn run(&self, ctx: &mut ExecutionContext, _cancel: &CancelSignal) -> StepAction {
        let reporter = &self.services.reporter;
        let label = self.relation.label();
        let condition = self.relation.condition();
        if !condition.holds(&self.services.config) {
            reporter.say(&format!(
                "Skipping linking {}: {}",
                label,
                condition.skip_reason()
            ));
            return StepAction::Continue;
        }

        let server = match ctx.require_id(keys::SERVER_UUID).map(str::to_string) {
            Ok(id) => id,
            Err(e) => return self.services.halt(ctx, e.into()),
        };
        let target = match self.target(ctx).map(|t| t.map(str::to_string)) {
            Ok(Some(id)) => id,
            Ok(None) => {
                reporter.say(&format!("No {} id detected. Skipping link.", label));
                return StepAction::Continue;
            }
            Err(e) => return self.services.halt(ctx, e.into()),
        };

        reporter.say(&format!("Linking the server ({}) to the {} ({})...", server, label, target));
        match self
            .relation
            .link(self.services.provider.as_ref(), &server, &target)
            .await
        {
            Ok(()) => {
                info!(step = self.name(), server = %server, uuid = %target, "linked");
                ctx.put(self.relation.linked_key(), LinkState::Linked);
                reporter.say(&format!("Linked the server ({}) to the {} ({})", server, label, target));
                StepAction::Continue
            }
            Err(e) => {
                ctx.put(self.relation.linked_key(), LinkState::Failed);
                let err = BuildError::provider(format!("linking server - {}", label), e);
                self.services.halt(ctx, err)
            }
        }
    }

    async fn cleanup(&self, ctx: &mut ExecutionContext) -> Result<(), CleanupError> {
        let linked_key = self.relation.linked_key();
        let state = ctx.link_state(linked_key)?;
        if !state.is_linked() {
            debug!(step = self.name(), state = ?state, "not linked, nothing to unlink");
            return Ok(());
        }

        let server = ctx.require_id(keys::SERVER_UUID)?.to_string();
        let target = ctx.require_id(self.relation.target_key())?.to_string();
        let label = self.relation.label();
        let reporter = &self.services.reporter;

        reporter.say(&format!("Unlinking the server ({}) and the {} ({})...", server, label, target));
        self.relation
            .unlink(self.services.provider.as_ref(), &server, &target)
            .await
            .map_err(|e| {
                CleanupError::provider(
                    format!("Error unlinking server ({}) and {} ({})", server, label, target),
                    e,
                )
            })?;
        ctx.remove(linked_key);
        reporter.say(&format!("Unlinked the server ({}) and the {} ({})", server, label, target));
        Ok(())
    }
}
