//! gridbake: template builds on gridscale
//!
//! A build creates a server with its storages, IP address and optional ISO
//! image, boots and provisions it, snapshots the disk and turns the snapshot
//! into a template. Every resource is created by a step with a compensating
//! cleanup; a failure anywhere unwinds everything in reverse order.

pub mod artifact;
pub mod build;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod provider;
pub mod remote;
pub mod reporter;
pub mod runner;
pub mod step;
pub mod steps;

pub use artifact::Artifact;
pub use build::{BuildOutcome, Builder};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::{BuildConfig, ConfigLoader};
pub use context::{ExecutionContext, LinkState};
pub use error::{BuildError, CleanupError, ContextError, ProviderError, RemoteError};
pub use reporter::{ConsoleReporter, Reporter};
pub use runner::{BuildMetadata, RunOutcome, RunSummary, Runner};
pub use step::{BuildServices, Step, StepAction};
