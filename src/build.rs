//! The template build: step table assembly and execution.

use crate::artifact::Artifact;
use crate::cancel::CancelSignal;
use crate::error::{BuildError, RunnerError};
use crate::runner::{BuildMetadata, RunSummary, Runner};
use crate::step::{BuildServices, Step};
use crate::steps::{
    Attach, ExecuteBootCommand, FinishIsoInstallation, LookupPublicNetwork, Provision, ProvisionHook,
    Relation, ResourceKind, RunProvisionHook, ServeHttpFiles, ShutdownServer, StartServer, VncConnect,
};
use std::sync::Arc;
use tracing::info;

/// Result of one build, including the cleanup bookkeeping.
#[derive(Debug)]
pub struct BuildOutcome {
    pub result: Result<Option<Artifact>, BuildError>,
    pub summary: RunSummary,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Builder {
    services: BuildServices,
    hook: Option<Arc<dyn ProvisionHook>>,
}

impl Builder {
    pub fn new(services: BuildServices, hook: Option<Arc<dyn ProvisionHook>>) -> Self {
        Self { services, hook }
    }

    /// The ordered step table. Position is both creation order and, reversed,
    /// teardown order.
    pub fn step_table(&self) -> Vec<Box<dyn Step>> {
        let s = &self.services;
        vec![
            Box::new(LookupPublicNetwork::new(s.clone())),
            Box::new(ServeHttpFiles::new(s.clone())),
            Box::new(Provision::new(ResourceKind::Server, s.clone())),
            Box::new(Provision::new(ResourceKind::SshKey, s.clone())),
            Box::new(Provision::new(ResourceKind::BootStorage, s.clone())),
            Box::new(Attach::new(Relation::BootStorage, s.clone())),
            Box::new(Provision::new(ResourceKind::SecondaryStorage, s.clone())),
            Box::new(Attach::new(Relation::SecondaryStorage, s.clone())),
            Box::new(Provision::new(ResourceKind::IpAddress, s.clone())),
            Box::new(Attach::new(Relation::IpAddress, s.clone())),
            Box::new(Attach::new(Relation::PublicNetwork, s.clone())),
            Box::new(Provision::new(ResourceKind::IsoImage, s.clone())),
            Box::new(Attach::new(Relation::IsoImage, s.clone())),
            Box::new(StartServer::new(s.clone())),
            Box::new(VncConnect::new(s.clone())),
            Box::new(ExecuteBootCommand::new(s.clone())),
            Box::new(FinishIsoInstallation::new(s.clone())),
            Box::new(RunProvisionHook::new(self.hook.clone(), Arc::clone(&s.reporter))),
            Box::new(ShutdownServer::new(s.clone())),
            Box::new(Provision::new(ResourceKind::Snapshot, s.clone())),
            Box::new(Provision::new(ResourceKind::Template, s.clone())),
        ]
    }

    /// Run the whole build. Only a malformed step table fails outright; every
    /// runtime failure is reported through [`BuildOutcome::result`].
    pub async fn run(&self, cancel: &CancelSignal) -> Result<BuildOutcome, RunnerError> {
        let runner = Runner::new(self.step_table(), Arc::clone(&self.services.reporter))?;
        let config = &self.services.config;
        let metadata = BuildMetadata {
            build_name: config.server_name.clone(),
            template_name: config.template_name.clone(),
        };
        info!(steps = runner.len(), template = %metadata.template_name, "starting build");

        let outcome = runner.run(metadata, cancel).await;
        let result = outcome
            .result
            .map(|id| id.map(|uuid| Artifact::new(config.template_name.clone(), uuid)));
        if let Ok(Some(artifact)) = &result {
            info!(uuid = %artifact.uuid, "build finished");
        }
        Ok(BuildOutcome {
            result,
            summary: outcome.summary,
        })
    }
}
