//! Merge rules: defaults and override order.
//!
//! Sources are layered lowest to highest: defaults, global file, build file,
//! `GRIDBAKE_*` environment. Legacy `GRIDSCALE_*` variables only fill fields
//! that are still empty after merging.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

pub const DEFAULT_API_URL: &str = crate::provider::gridscale::DEFAULT_API_URL;
pub const DEFAULT_HOSTNAME: &str = "packer-hostname";
pub const DEFAULT_BOOT_WAIT_SECS: u64 = 120;
pub const DEFAULT_BOOT_KEY_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 120;

/// Create a Config builder with merge policy defaults applied.
///
/// `api_url` and `hostname` are left unset so legacy variables can still fill them.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("boot_wait_secs", DEFAULT_BOOT_WAIT_SECS)?
        .set_default("boot_key_interval_ms", DEFAULT_BOOT_KEY_INTERVAL_MS)?
        .set_default("shutdown_timeout_secs", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?
        .set_default("secondary_storage", false)
}
