//! Runner: drives steps forward and compensations in reverse.
//!
//! Forward execution stops at the first `Halt`. Cleanup then runs for every
//! step in the table, last to first, exactly once each, regardless of how far
//! forward execution got. Cleanup failures are reported and collected but
//! never replace the run's recorded error.

use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::{BuildError, CleanupError, RunnerError};
use crate::reporter::Reporter;
use crate::step::{Step, StepAction};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Running(usize),
    Halted(usize),
    Completed,
    CleaningUp(usize),
    Done,
}

/// Build-time metadata written into the context before the first step.
#[derive(Debug, Clone, Default)]
pub struct BuildMetadata {
    pub build_name: String,
    pub template_name: String,
}

/// A cleanup that failed. The traversal continued past it.
#[derive(Debug)]
pub struct CleanupFailure {
    pub step: &'static str,
    pub error: CleanupError,
}

/// What happened during a run besides its result.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Steps whose forward action was invoked, in order.
    pub steps_run: Vec<&'static str>,
    /// Steps whose cleanup was invoked, in order.
    pub steps_cleaned: Vec<&'static str>,
    /// Index of the step that halted the run, if any.
    pub halted_at: Option<usize>,
    pub cleanup_failures: Vec<CleanupFailure>,
    pub phases: Vec<RunPhase>,
}

/// Result of a run plus its summary and the final context.
#[derive(Debug)]
pub struct RunOutcome {
    /// The template id on success. `Ok(None)` when the run completed without producing one.
    pub result: Result<Option<String>, BuildError>,
    pub summary: RunSummary,
    pub context: ExecutionContext,
}

/// Owns the ordered step table.
pub struct Runner {
    steps: Vec<Box<dyn Step>>,
    reporter: Arc<dyn Reporter>,
}

impl Runner {
    /// Build a runner, rejecting tables where two steps write the same key.
    pub fn new(steps: Vec<Box<dyn Step>>, reporter: Arc<dyn Reporter>) -> Result<Self, RunnerError> {
        if steps.is_empty() {
            return Err(RunnerError::EmptyStepTable);
        }
        let mut producers: HashMap<&'static str, &'static str> = HashMap::new();
        for step in &steps {
            for key in step.produces() {
                if let Some(first) = producers.insert(key, step.name()) {
                    return Err(RunnerError::DuplicateProducer {
                        key: key.to_string(),
                        first: first.to_string(),
                        second: step.name().to_string(),
                    });
                }
            }
        }
        Ok(Self { steps, reporter })
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, metadata: BuildMetadata, cancel: &CancelSignal) -> RunOutcome {
        let mut summary = RunSummary::default();
        let mut phase = RunPhase::Pending;
        record_phase(&mut summary, &mut phase, RunPhase::Pending);

        let mut ctx = ExecutionContext::new();
        ctx.put(keys::BUILD_NAME, metadata.build_name);
        ctx.put(keys::TEMPLATE_NAME, metadata.template_name);

        for (index, step) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(step = step.name(), index, "cancelled before step");
                self.reporter.error(&BuildError::Cancelled.to_string());
                ctx.record_error(BuildError::Cancelled);
                summary.halted_at = Some(index);
                record_phase(&mut summary, &mut phase, RunPhase::Halted(index));
                break;
            }

            record_phase(&mut summary, &mut phase, RunPhase::Running(index));
            summary.steps_run.push(step.name());
            debug!(step = step.name(), index, "running step");

            let action = match AssertUnwindSafe(step.run(&mut ctx, cancel))
                .catch_unwind()
                .await
            {
                Ok(action) => action,
                Err(payload) => {
                    let err = BuildError::StepPanicked {
                        step: step.name().to_string(),
                        message: panic_message(payload.as_ref()),
                    };
                    self.reporter.error(&err.to_string());
                    ctx.record_error(err);
                    StepAction::Halt
                }
            };

            if action == StepAction::Halt {
                if !ctx.has_error() {
                    ctx.record_error(BuildError::HaltedWithoutError {
                        step: step.name().to_string(),
                    });
                }
                info!(step = step.name(), index, "step halted the run");
                summary.halted_at = Some(index);
                record_phase(&mut summary, &mut phase, RunPhase::Halted(index));
                break;
            }
        }

        if summary.halted_at.is_none() {
            record_phase(&mut summary, &mut phase, RunPhase::Completed);
        }

        for (index, step) in self.steps.iter().enumerate().rev() {
            record_phase(&mut summary, &mut phase, RunPhase::CleaningUp(index));
            summary.steps_cleaned.push(step.name());
            debug!(step = step.name(), index, "cleaning up step");

            let outcome = match AssertUnwindSafe(step.cleanup(&mut ctx))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => Err(CleanupError::Panicked {
                    step: step.name().to_string(),
                    message: panic_message(payload.as_ref()),
                }),
            };

            if let Err(error) = outcome {
                warn!(step = step.name(), index, error = %error, "cleanup failed");
                self.reporter.error(&error.to_string());
                summary.cleanup_failures.push(CleanupFailure {
                    step: step.name(),
                    error,
                });
            }
        }
        record_phase(&mut summary, &mut phase, RunPhase::Done);

        let result = match ctx.take_error() {
            Some(err) => Err(err),
            None => match ctx.optional_id(keys::TEMPLATE_UUID) {
                Ok(Some(id)) => Ok(Some(id.to_string())),
                Ok(None) => {
                    warn!("run completed but {} was never written. Bug?", keys::TEMPLATE_UUID);
                    Ok(None)
                }
                Err(err) => Err(BuildError::Invariant(err)),
            },
        };

        RunOutcome {
            result,
            summary,
            context: ctx,
        }
    }
}

fn record_phase(summary: &mut RunSummary, current: &mut RunPhase, next: RunPhase) {
    debug!(from = ?current, to = ?next, "runner phase");
    *current = next;
    summary.phases.push(next);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
