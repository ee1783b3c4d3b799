//! Step contract
//!
//! A step is a forward action plus a compensating cleanup. Steps talk to each
//! other only through the [`ExecutionContext`].

use crate::cancel::CancelSignal;
use crate::config::BuildConfig;
use crate::context::ExecutionContext;
use crate::error::{BuildError, CleanupError};
use crate::provider::ResourceProvider;
use crate::remote::RemoteControlChannel;
use crate::reporter::Reporter;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// Outcome of a forward action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// Collaborators every step is wired with.
#[derive(Clone)]
pub struct BuildServices {
    pub provider: Arc<dyn ResourceProvider>,
    pub remote: Arc<dyn RemoteControlChannel>,
    pub reporter: Arc<dyn Reporter>,
    pub config: Arc<BuildConfig>,
}

impl BuildServices {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        remote: Arc<dyn RemoteControlChannel>,
        reporter: Arc<dyn Reporter>,
        config: Arc<BuildConfig>,
    ) -> Self {
        Self {
            provider,
            remote,
            reporter,
            config,
        }
    }

    /// Report `err`, record it as the run's error and halt.
    pub fn halt(&self, ctx: &mut ExecutionContext, err: BuildError) -> StepAction {
        halt(ctx, self.reporter.as_ref(), err)
    }
}

/// Report `err`, record it as the run's error and halt.
pub fn halt(ctx: &mut ExecutionContext, reporter: &dyn Reporter, err: BuildError) -> StepAction {
    error!(error = %err, "step failed");
    reporter.error(&err.to_string());
    ctx.record_error(err);
    StepAction::Halt
}

/// One unit of the build.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Context keys this step writes. Each key has exactly one producer per step table.
    fn produces(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Forward action. On failure the step records the error and returns `Halt`.
    async fn run(&self, ctx: &mut ExecutionContext, cancel: &CancelSignal) -> StepAction;

    /// Compensating action. Must tolerate never having run.
    async fn cleanup(&self, _ctx: &mut ExecutionContext) -> Result<(), CleanupError> {
        Ok(())
    }
}
