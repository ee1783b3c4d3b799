use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::BuildError;
use crate::reporter::Reporter;
use crate::step::{halt, Step, StepAction};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// External provisioning run against the booted build server.
///
/// The hook sees the whole execution context, e.g. `server_ip` and
/// `ssh_private_key`. An `Err` fails the build and triggers cleanup.
#[async_trait]
pub trait ProvisionHook: Send + Sync {
    async fn provision(&self, ctx: &ExecutionContext) -> Result<(), String>;
}

pub struct RunProvisionHook {
    hook: Option<Arc<dyn ProvisionHook>>,
    reporter: Arc<dyn Reporter>,
}

impl RunProvisionHook {
    pub fn new(hook: Option<Arc<dyn ProvisionHook>>, reporter: Arc<dyn Reporter>) -> Self {
        Self { hook, reporter }
    }
}

#[async_trait]
impl Step for RunProvisionHook {
    fn name(&self) -> &'static str {
        "RunProvisionHook"
    }

    async fn run(&self, ctx: &mut ExecutionContext, cancel: &CancelSignal) -> StepAction {
        let hook = match &self.hook {
            Some(hook) => Arc::clone(hook),
            None => return StepAction::Continue,
        };
        if let Err(err) = cancel.check() {
            return halt(ctx, self.reporter.as_ref(), err);
        }
        let target = match ctx.optional_id(keys::SERVER_IP) {
            Ok(ip) => ip.unwrap_or("").to_string(),
            Err(err) => return halt(ctx, self.reporter.as_ref(), BuildError::Invariant(err)),
        };
        self.reporter
            .say(&format!("Running provisioners against {}...", target));
        match hook.provision(ctx).await {
            Ok(()) => {
                info!(server_ip = %target, "provisioning hook finished");
                StepAction::Continue
            }
            Err(message) => halt(ctx, self.reporter.as_ref(), BuildError::Hook(message)),
        }
    }
}
