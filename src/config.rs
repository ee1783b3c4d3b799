//! Configuration System
//!
//! Layered build configuration: built-in defaults, the user-level global file,
//! the build file, `GRIDBAKE_*` environment variables and the legacy
//! `GRIDSCALE_*` variables. Validation reports every problem at once.

use crate::logging::LoggingConfig;
use crate::provider::parse_request_headers;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Everything one template build needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// API token for authentication
    #[serde(default)]
    pub api_token: String,

    /// User UUID for authentication
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub api_url: String,

    /// Extra HTTP headers, "key1:val1,key2:val2"
    #[serde(default)]
    pub api_request_headers: String,

    #[serde(default)]
    pub template_name: String,

    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub server_name: String,

    #[serde(default)]
    pub server_cores: u32,

    /// Memory in GB
    #[serde(default)]
    pub server_memory: u32,

    /// Boot storage capacity in GB
    #[serde(default)]
    pub storage_capacity: u32,

    /// Install onto a second storage and snapshot that one
    #[serde(default)]
    pub secondary_storage: bool,

    #[serde(default)]
    pub base_template_uuid: String,

    #[serde(default)]
    pub isoimage_uuid: String,

    #[serde(default)]
    pub isoimage_url: String,

    #[serde(default)]
    pub boot_command: Vec<String>,

    #[serde(default)]
    pub boot_wait_secs: u64,

    #[serde(default)]
    pub boot_key_interval_ms: u64,

    /// Files and directories served over HTTP during installation
    #[serde(default)]
    pub files: Vec<PathBuf>,

    #[serde(default)]
    pub ssh_username: String,

    #[serde(default)]
    pub ssh_password: String,

    /// Where to write the generated private key, if anywhere
    #[serde(default)]
    pub debug_key_path: Option<PathBuf>,

    #[serde(default)]
    pub shutdown_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_key: String::new(),
            api_url: merge::DEFAULT_API_URL.to_string(),
            api_request_headers: String::new(),
            template_name: String::new(),
            hostname: merge::DEFAULT_HOSTNAME.to_string(),
            server_name: String::new(),
            server_cores: 0,
            server_memory: 0,
            storage_capacity: 0,
            secondary_storage: false,
            base_template_uuid: String::new(),
            isoimage_uuid: String::new(),
            isoimage_url: String::new(),
            boot_command: Vec::new(),
            boot_wait_secs: merge::DEFAULT_BOOT_WAIT_SECS,
            boot_key_interval_ms: merge::DEFAULT_BOOT_KEY_INTERVAL_MS,
            files: Vec::new(),
            ssh_username: String::new(),
            ssh_password: String::new(),
            debug_key_path: None,
            shutdown_timeout_secs: merge::DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            logging: LoggingConfig::default(),
        }
    }
}

impl BuildConfig {
    /// True when the build starts from an existing template instead of an ISO.
    pub fn uses_base_template(&self) -> bool {
        !self.base_template_uuid.is_empty()
    }

    /// True when an ISO image is configured, either by UUID or by URL.
    pub fn iso_requested(&self) -> bool {
        !self.isoimage_uuid.is_empty() || !self.isoimage_url.is_empty()
    }

    pub fn serves_files(&self) -> bool {
        !self.files.is_empty()
    }

    /// Fill generated names that were left empty.
    pub fn apply_generated_defaults(&mut self) {
        if self.template_name.is_empty() {
            self.template_name = format!("packer-{}", chrono::Utc::now().timestamp());
        }
        if self.server_name.is_empty() {
            self.server_name = format!("packer-{}", uuid::Uuid::new_v4());
        }
        if self.hostname.is_empty() {
            self.hostname = merge::DEFAULT_HOSTNAME.to_string();
        }
        if self.api_url.is_empty() {
            self.api_url = merge::DEFAULT_API_URL.to_string();
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.api_token.is_empty() {
            errors.push(ValidationError::Missing("api_token"));
        }
        if self.api_key.is_empty() {
            errors.push(ValidationError::Missing("api_key"));
        }
        for (field, value) in [
            ("server_cores", self.server_cores),
            ("server_memory", self.server_memory),
            ("storage_capacity", self.storage_capacity),
        ] {
            if value == 0 {
                errors.push(ValidationError::NotPositive(field));
            }
        }
        if !self.iso_requested() && !self.uses_base_template() {
            errors.push(ValidationError::NoImageSource);
        }
        if self.ssh_username.is_empty() {
            errors.push(ValidationError::Missing("ssh_username"));
        }
        if let Err(e) = parse_request_headers(&self.api_request_headers) {
            errors.push(ValidationError::Invalid("api_request_headers", e.to_string()));
        }
        if let Err(e) = crate::remote::bootcmd::parse(&self.boot_command.concat()) {
            errors.push(ValidationError::Invalid("boot_command", e.to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Missing(&'static str),
    NotPositive(&'static str),
    NoImageSource,
    Invalid(&'static str, String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Missing(field) => write!(f, "{} must be specified", field),
            ValidationError::NotPositive(field) => {
                write!(f, "{} must be greater than 0", field)
            }
            ValidationError::NoImageSource => write!(
                f,
                "one of these fields has to be set: isoimage_uuid, isoimage_url, base_template_uuid"
            ),
            ValidationError::Invalid(field, msg) => write!(f, "{}: {}", field, msg),
        }
    }
}

impl std::error::Error for ValidationError {}
