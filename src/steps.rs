//! Build steps
//!
//! Resource creation and linking go through two generic steps, [`Provision`]
//! and [`Attach`], parameterized by what they create or link. Everything else
//! (power, console, file server, hook) is a dedicated step.

use crate::config::BuildConfig;

pub mod attach;
pub mod console;
pub mod file_server;
pub mod hook;
pub mod iso_install;
pub mod network;
pub mod power;
pub mod provision;
pub mod ssh_key;

pub use attach::{Attach, Relation};
pub use console::{ExecuteBootCommand, VncConnect};
pub use file_server::ServeHttpFiles;
pub use hook::{ProvisionHook, RunProvisionHook};
pub use iso_install::FinishIsoInstallation;
pub use network::LookupPublicNetwork;
pub use power::{ShutdownServer, StartServer};
pub use provision::{Provision, ResourceKind};

/// When a conditional step does its work. A step whose condition does not
/// hold returns `Continue` without touching the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    BaseTemplate,
    SecondaryStorage,
    IsoRequested,
    ServesFiles,
    BootCommand,
}

impl Condition {
    pub fn holds(self, config: &BuildConfig) -> bool {
        match self {
            Condition::Always => true,
            Condition::BaseTemplate => config.uses_base_template(),
            Condition::SecondaryStorage => config.secondary_storage,
            Condition::IsoRequested => config.iso_requested(),
            Condition::ServesFiles => config.serves_files(),
            Condition::BootCommand => !config.boot_command.is_empty(),
        }
    }

    /// Why the step is skipped, for the reporter.
    pub fn skip_reason(self) -> &'static str {
        match self {
            Condition::Always => "",
            Condition::BaseTemplate => "no base template is used",
            Condition::SecondaryStorage => "no secondary storage is requested",
            Condition::IsoRequested => "no ISO image is requested",
            Condition::ServesFiles => "no file server is requested",
            Condition::BootCommand => "boot_command is not set",
        }
    }
}
