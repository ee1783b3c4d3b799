//! Config loader facade: the one entry point for building a [`BuildConfig`].

use crate::config::{merge, sources, BuildConfig};
use crate::error::ConfigError;
use std::path::Path;
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the merged configuration. Without a build file only the global file
    /// and environment contribute.
    pub fn load(build_file: Option<&Path>) -> Result<BuildConfig, ConfigError> {
        let mut builder = merge::builder_with_defaults()?;
        builder = sources::global_file::add_to_builder(builder)?;
        if let Some(path) = build_file {
            builder = sources::build_file::add_to_builder(builder, path)?;
        }
        builder = sources::environment::add_to_builder(builder);

        let mut config: BuildConfig = builder.build()?.try_deserialize()?;
        sources::environment::apply_legacy_fallbacks(&mut config);
        config.apply_generated_defaults();
        debug!(
            template_name = %config.template_name,
            server_name = %config.server_name,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<BuildConfig, ConfigError> {
        Self::load(Some(path))
    }

    /// Load and validate in one go.
    pub fn load_validated(build_file: Option<&Path>) -> Result<BuildConfig, ConfigError> {
        let config = Self::load(build_file)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}
