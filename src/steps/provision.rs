//! Generic create step.
//!
//! One [`Provision`] step per [`ResourceKind`]. Run creates the resource and
//! records its id; cleanup deletes whatever id was recorded.

use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::{BuildError, CleanupError, ContextError, ProviderError};
use crate::provider::{
    tolerate, IpCreateRequest, IpFamily, IsoImageCreateRequest, PasswordType, ServerCreateRequest,
    SnapshotCreateRequest, SshKeyCreateRequest, StorageCreateRequest, StorageTemplate, StorageType,
    TemplateCreateRequest, BENIGN_DELETE,
};
use crate::step::{BuildServices, Step, StepAction};
use crate::steps::{ssh_key, Condition};
use async_trait::async_trait;
use tracing::{debug, info};

/// A stop on a server that is already off or gone is not an error.
const BENIGN_STOP: &[u16] = &[400, 404];

/// What a [`Provision`] step creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Server,
    SshKey,
    BootStorage,
    SecondaryStorage,
    IpAddress,
    IsoImage,
    Snapshot,
    Template,
}

impl ResourceKind {
    /// Context key holding the created id.
    pub fn id_key(self) -> &'static str {
        match self {
            ResourceKind::Server => keys::SERVER_UUID,
            ResourceKind::SshKey => keys::SSH_KEY_UUID,
            ResourceKind::BootStorage => keys::BOOT_STORAGE_UUID,
            ResourceKind::SecondaryStorage => keys::SECONDARY_STORAGE_UUID,
            ResourceKind::IpAddress => keys::IP_ADDR_UUID,
            ResourceKind::IsoImage => keys::ISO_IMAGE_UUID,
            ResourceKind::Snapshot => keys::SNAPSHOT_UUID,
            ResourceKind::Template => keys::TEMPLATE_UUID,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Server => "server",
            ResourceKind::SshKey => "SSH key",
            ResourceKind::BootStorage => "boot storage",
            ResourceKind::SecondaryStorage => "secondary storage",
            ResourceKind::IpAddress => "IP address",
            ResourceKind::IsoImage => "ISO image",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Template => "template",
        }
    }

    pub fn step_name(self) -> &'static str {
        match self {
            ResourceKind::Server => "CreateServer",
            ResourceKind::SshKey => "CreateSshKey",
            ResourceKind::BootStorage => "CreateBootStorage",
            ResourceKind::SecondaryStorage => "CreateSecondaryStorage",
            ResourceKind::IpAddress => "CreateIpAddress",
            ResourceKind::IsoImage => "CreateIsoImage",
            ResourceKind::Snapshot => "CreateSnapshot",
            ResourceKind::Template => "CreateTemplate",
        }
    }

    pub fn condition(self) -> Condition {
        match self {
            ResourceKind::SshKey => Condition::BaseTemplate,
            ResourceKind::SecondaryStorage => Condition::SecondaryStorage,
            ResourceKind::IsoImage => Condition::IsoRequested,
            _ => Condition::Always,
        }
    }

    fn extra_keys(self) -> &'static [&'static str] {
        match self {
            ResourceKind::IpAddress => &[keys::SERVER_IP],
            ResourceKind::SshKey => &[keys::SSH_PRIVATE_KEY],
            _ => &[],
        }
    }

    /// The template is the build's output and outlives the run.
    fn has_cleanup(self) -> bool {
        !matches!(self, ResourceKind::Template)
    }
}

/// The storage a snapshot is taken from: the secondary storage when present.
pub fn snapshot_source(ctx: &ExecutionContext) -> Result<Option<&str>, ContextError> {
    match ctx.optional_id(keys::SECONDARY_STORAGE_UUID)? {
        Some(id) => Ok(Some(id)),
        None => ctx.optional_id(keys::BOOT_STORAGE_UUID),
    }
}

pub struct Provision {
    kind: ResourceKind,
    services: BuildServices,
}

impl Provision {
    pub fn new(kind: ResourceKind, services: BuildServices) -> Self {
        Self { kind, services }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Create the resource and return its id.
    async fn create(&self, ctx: &mut ExecutionContext) -> Result<String, BuildError> {
        let provider = self.services.provider.as_ref();
        let config = self.services.config.as_ref();
        let action = format!("creating {}", self.kind.label());
        let failed = |e: ProviderError| BuildError::provider(action.clone(), e);

        let id = match self.kind {
            ResourceKind::Server => {
                let request = ServerCreateRequest {
                    name: config.server_name.clone(),
                    cores: config.server_cores,
                    memory: config.server_memory,
                };
                provider.create_server(&request).await.map_err(failed)?.object_uuid
            }
            ResourceKind::SshKey => {
                let key = ssh_key::generate("gridbake")?;
                let request = SshKeyCreateRequest {
                    name: format!("packer-{}", uuid::Uuid::new_v4()),
                    sshkey: key.public_openssh,
                };
                let created = provider.create_ssh_key(&request).await.map_err(failed)?;
                // Recorded before anything else can fail so cleanup finds the key.
                ctx.put(keys::SSH_KEY_UUID, created.object_uuid.clone());
                if let Some(path) = &config.debug_key_path {
                    self.services
                        .reporter
                        .message(&format!("Saving key for debug purposes: {}", path.display()));
                    ssh_key::save_debug_key(path, &key.private_pem)?;
                }
                ctx.put(keys::SSH_PRIVATE_KEY, key.private_pem);
                created.object_uuid
            }
            ResourceKind::BootStorage => {
                let template = if config.uses_base_template() {
                    let ssh_key_uuid = ctx.require_id(keys::SSH_KEY_UUID)?.to_string();
                    Some(StorageTemplate {
                        template_uuid: config.base_template_uuid.clone(),
                        password: Some(config.ssh_password.clone()).filter(|p| !p.is_empty()),
                        password_type: Some(PasswordType::Plain),
                        hostname: Some(config.hostname.clone()),
                        sshkeys: vec![ssh_key_uuid],
                    })
                } else {
                    None
                };
                let request = StorageCreateRequest {
                    name: config.server_name.clone(),
                    capacity: config.storage_capacity,
                    storage_type: StorageType::Insane,
                    template,
                };
                provider.create_storage(&request).await.map_err(failed)?.object_uuid
            }
            ResourceKind::SecondaryStorage => {
                let request = StorageCreateRequest {
                    name: format!("{}-secondary", config.server_name),
                    capacity: config.storage_capacity,
                    storage_type: StorageType::Insane,
                    template: None,
                };
                provider.create_storage(&request).await.map_err(failed)?.object_uuid
            }
            ResourceKind::IpAddress => {
                let request = IpCreateRequest {
                    name: format!("{}-IPv4", config.server_name),
                    family: IpFamily::V4,
                };
                let created = provider.create_ip(&request).await.map_err(failed)?;
                ctx.put(keys::SERVER_IP, created.ip);
                created.object_uuid
            }
            ResourceKind::IsoImage => {
                if !config.isoimage_uuid.is_empty() {
                    self.services.reporter.say(&format!(
                        "Using the configured ISO image ({})",
                        config.isoimage_uuid
                    ));
                    config.isoimage_uuid.clone()
                } else {
                    let request = IsoImageCreateRequest {
                        name: config.server_name.clone(),
                        source_url: config.isoimage_url.clone(),
                    };
                    provider.create_iso_image(&request).await.map_err(failed)?.object_uuid
                }
            }
            ResourceKind::Snapshot => {
                let storage = snapshot_source(ctx)?
                    .ok_or_else(|| ContextError::Empty {
                        key: keys::BOOT_STORAGE_UUID.to_string(),
                    })?
                    .to_string();
                let request = SnapshotCreateRequest {
                    name: config.template_name.clone(),
                };
                provider
                    .create_snapshot(&storage, &request)
                    .await
                    .map_err(failed)?
                    .object_uuid
            }
            ResourceKind::Template => {
                let snapshot_uuid = ctx.require_id(keys::SNAPSHOT_UUID)?.to_string();
                let request = TemplateCreateRequest {
                    name: config.template_name.clone(),
                    snapshot_uuid,
                };
                provider.create_template(&request).await.map_err(failed)?.object_uuid
            }
        };
        Ok(id)
    }

    async fn destroy(&self, ctx: &ExecutionContext, id: &str) -> Result<(), CleanupError> {
        let provider = self.services.provider.as_ref();
        let label = self.kind.label();
        let manual = |e| CleanupError::provider(format!("Error destroying {} ({})", label, id), e);

        match self.kind {
            ResourceKind::Server => {
                tolerate(provider.stop_server(id).await, BENIGN_STOP)
                    .map_err(|e| CleanupError::provider(format!("Error stopping server ({})", id), e))?;
                tolerate(provider.delete_server(id).await, BENIGN_DELETE).map_err(manual)
            }
            ResourceKind::SshKey => tolerate(provider.delete_ssh_key(id).await, BENIGN_DELETE).map_err(manual),
            ResourceKind::BootStorage | ResourceKind::SecondaryStorage => {
                tolerate(provider.delete_storage(id).await, BENIGN_DELETE).map_err(manual)
            }
            ResourceKind::IpAddress => tolerate(provider.delete_ip(id).await, BENIGN_DELETE).map_err(manual),
            ResourceKind::IsoImage => {
                tolerate(provider.delete_iso_image(id).await, BENIGN_DELETE).map_err(manual)
            }
            ResourceKind::Snapshot => {
                let storage = snapshot_source(ctx)?.ok_or_else(|| ContextError::Missing {
                    key: keys::BOOT_STORAGE_UUID.to_string(),
                })?;
                tolerate(provider.delete_snapshot(storage, id).await, BENIGN_DELETE).map_err(manual)
            }
            ResourceKind::Template => Ok(()),
        }
    }
}

#[async_trait]
impl Step for Provision {
    fn name(&self) -> &'static str {
        self.kind.step_name()
    }

    fn produces(&self) -> Vec<&'static str> {
        let mut produced = vec![self.kind.id_key()];
        produced.extend_from_slice(self.kind.extra_keys());
        produced
    }

    async fn run(&self, ctx: &mut ExecutionContext, _cancel: &CancelSignal) -> StepAction {
        let reporter = &self.services.reporter;
        let condition = self.kind.condition();
        if !condition.holds(&self.services.config) {
            reporter.say(&format!(
                "Skipping {}: {}",
                self.kind.label(),
                condition.skip_reason()
            ));
            return StepAction::Continue;
        }

        reporter.say(&format!("Creating {}...", self.kind.label()));
        match self.create(ctx).await {
            Ok(id) => {
                info!(step = self.name(), key = self.kind.id_key(), uuid = %id, "resource created");
                reporter.say(&format!("Created {} ({})", self.kind.label(), id));
                ctx.put(self.kind.id_key(), id);
                StepAction::Continue
            }
            Err(err) => self.services.halt(ctx, err),
        }
    }

    async fn cleanup(&self, ctx: &mut ExecutionContext) -> Result<(), CleanupError> {
        if !self.kind.has_cleanup() {
            return Ok(());
        }
        let config = &self.services.config;
        if self.kind == ResourceKind::IsoImage && !config.isoimage_uuid.is_empty() {
            debug!("ISO image comes from configuration, not deleting it");
            return Ok(());
        }

        let id = match ctx.optional_id(self.kind.id_key())? {
            Some(id) => id.to_string(),
            None => {
                debug!(step = self.name(), "nothing to clean");
                return Ok(());
            }
        };

        let reporter = &self.services.reporter;
        reporter.say(&format!("Destroying {} ({})...", self.kind.label(), id));
        self.destroy(ctx, &id).await?;
        ctx.remove(self.kind.id_key());
        reporter.say(&format!("Destroyed {} ({})", self.kind.label(), id));
        Ok(())
    }
}
