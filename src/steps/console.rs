//! Console steps: open the server console and type the boot command.

use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::{BuildError, CleanupError, RemoteError};
use crate::remote::bootcmd::{self, BootVars};
use crate::remote::{ConsoleEndpoint, ConsoleHandle, KeyAction};
use crate::step::{BuildServices, Step, StepAction};
use crate::steps::Condition;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opens a console session on the build server and parks it in the context.
pub struct VncConnect {
    services: BuildServices,
}

impl VncConnect {
    pub fn new(services: BuildServices) -> Self {
        Self { services }
    }

    async fn connect(&self, ctx: &ExecutionContext) -> Result<ConsoleHandle, BuildError> {
        let provider = self.services.provider.as_ref();
        let server = ctx.require_id(keys::SERVER_UUID)?;
        let info = provider
            .server(server)
            .await
            .map_err(|e| BuildError::provider("reading server console token", e))?;
        let endpoint = ConsoleEndpoint::for_api(provider.api_url(), &info.console_token);
        self.services
            .reporter
            .say(&format!("Connecting to the console of server ({})...", server));
        self.services
            .remote
            .open_console(&endpoint)
            .await
            .map_err(|e| BuildError::remote("connecting to the server console", e))
    }
}

#[async_trait]
impl Step for VncConnect {
    fn name(&self) -> &'static str {
        "VncConnect"
    }

    fn produces(&self) -> Vec<&'static str> {
        vec![keys::VNC_CONN]
    }

    async fn run(&self, ctx: &mut ExecutionContext, _cancel: &CancelSignal) -> StepAction {
        if !Condition::BootCommand.holds(&self.services.config) {
            debug!("no boot command, not connecting to the console");
            return StepAction::Continue;
        }
        match self.connect(ctx).await {
            Ok(session) => {
                info!("console session open");
                ctx.put_handle(keys::VNC_CONN, session);
                StepAction::Continue
            }
            Err(err) => self.services.halt(ctx, err),
        }
    }

    async fn cleanup(&self, ctx: &mut ExecutionContext) -> Result<(), CleanupError> {
        if !ctx.contains(keys::VNC_CONN) {
            return Ok(());
        }
        let mut session = ctx.take_handle::<ConsoleHandle>(keys::VNC_CONN)?;
        if let Err(e) = session.close().await {
            warn!(error = %e, "closing console session failed");
        }
        Ok(())
    }
}

/// Types the configured boot command into the open console session.
pub struct ExecuteBootCommand {
    services: BuildServices,
}

impl ExecuteBootCommand {
    pub fn new(services: BuildServices) -> Self {
        Self { services }
    }

    fn boot_vars(ctx: &ExecutionContext) -> Result<BootVars, BuildError> {
        let mut vars = BootVars::default();
        if let Some(ip) = ctx.optional_id(keys::HTTP_IP)? {
            vars.http_ip = ip.to_string();
        }
        if ctx.contains(keys::HTTP_PORT) {
            let port = *ctx.get_typed::<i64>(keys::HTTP_PORT)?;
            vars.http_port = u16::try_from(port).map_err(|_| {
                BuildError::remote(
                    "rendering boot command",
                    RemoteError::BootCommand(format!("invalid HTTP port {}", port)),
                )
            })?;
        }
        Ok(vars)
    }

    async fn type_command(&self, ctx: &mut ExecutionContext, cancel: &CancelSignal) -> Result<(), BuildError> {
        let config = &self.services.config;
        let wait = Duration::from_secs(config.boot_wait_secs);
        if !wait.is_zero() {
            self.services
                .reporter
                .say(&format!("Waiting {}s for boot...", wait.as_secs()));
            cancel.sleep(wait).await?;
        }

        let vars = Self::boot_vars(ctx)?;
        let command = bootcmd::render(&config.boot_command, &vars);
        let actions = bootcmd::parse(&command).map_err(|e| BuildError::remote("parsing boot command", e))?;
        let interval = Duration::from_millis(config.boot_key_interval_ms);

        let mut session = ctx.take_handle::<ConsoleHandle>(keys::VNC_CONN)?;
        self.services.reporter.say("Typing the boot command over the console...");
        let typed = async {
            for action in &actions {
                match action {
                    KeyAction::Wait(d) => cancel.sleep(*d).await?,
                    other => {
                        session
                            .send(other)
                            .await
                            .map_err(|e| BuildError::remote("running boot command", e))?;
                        cancel.sleep(interval).await?;
                    }
                }
            }
            Ok::<(), BuildError>(())
        }
        .await;
        let closed = session.close().await;
        typed?;
        closed.map_err(|e| BuildError::remote("closing console session", e))?;
        info!(actions = actions.len(), "boot command typed");
        Ok(())
    }
}

#[async_trait]
impl Step for ExecuteBootCommand {
    fn name(&self) -> &'static str {
        "ExecuteBootCommand"
    }

    async fn run(&self, ctx: &mut ExecutionContext, cancel: &CancelSignal) -> StepAction {
        if !Condition::BootCommand.holds(&self.services.config) {
            return StepAction::Continue;
        }
        match self.type_command(ctx, cancel).await {
            Ok(()) => StepAction::Continue,
            Err(err) => self.services.halt(ctx, err),
        }
    }
}
