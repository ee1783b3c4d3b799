//! Environment sources: `GRIDBAKE_*` overrides and legacy `GRIDSCALE_*` fallbacks.

use crate::config::BuildConfig;
use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const PREFIX: &str = "GRIDBAKE";

/// Add `GRIDBAKE_<FIELD>` overrides. Nested fields use `__`, e.g. `GRIDBAKE_LOGGING__LEVEL`.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("files"),
    )
}

/// Fill still-empty API fields from the legacy variables.
pub fn apply_legacy_fallbacks(config: &mut BuildConfig) {
    fill(&mut config.api_url, "GRIDSCALE_URL");
    fill(&mut config.api_token, "GRIDSCALE_TOKEN");
    fill(&mut config.api_key, "GRIDSCALE_UUID");
    fill(&mut config.api_request_headers, "GRIDSCALE_PACKER_HEADERS");
}

fn fill(field: &mut String, var: &str) {
    if field.is_empty() {
        if let Ok(value) = std::env::var(var) {
            *field = value;
        }
    }
}
