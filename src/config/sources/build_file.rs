//! Build file source: the TOML file named on the command line.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::{File, FileFormat};
use std::path::Path;

/// Add the build file to builder. The file must exist.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::Message(format!(
            "build file {} does not exist",
            path.display()
        )));
    }
    Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(true)))
}
