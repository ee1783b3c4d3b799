//! Error types for the gridbake template builder.

use thiserror::Error;

/// Errors returned by a [`ResourceProvider`](crate::provider::ResourceProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} failed with status {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Failed to decode response of {operation}: {message}")]
    Decode { operation: String, message: String },

    #[error("Platform request {request_uuid} failed: {message}")]
    RequestFailed {
        request_uuid: String,
        message: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            ProviderError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// True when the status code is one of `codes`.
    pub fn is_benign(&self, codes: &[u16]) -> bool {
        self.status().map(|s| codes.contains(&s)).unwrap_or(false)
    }

    /// Build an error from a status code and response body.
    pub fn from_status(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ProviderError::Status {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }
}

/// Violations of the execution context shape.
///
/// These indicate a broken step table or an unexpected upstream skip, never a
/// user-facing resource problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("{key} is missing from the execution context")]
    Missing { key: String },

    #[error("cannot convert {key} to {expected} (found {found})")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{key} is empty")]
    Empty { key: String },
}

/// Errors from the remote control channel (console typing, file upload, commands).
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Console error: {0}")]
    Console(String),

    #[error("Upload of {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("Remote command failed: {0}")]
    Command(String),

    #[error("Invalid boot command: {0}")]
    BootCommand(String),

    #[error("Remote control channel unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The terminal error of a build run.
///
/// Exactly one of these is recorded in the execution context when a step
/// halts the run.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Error {action}: {source}")]
    Provider {
        action: String,
        #[source]
        source: ProviderError,
    },

    #[error("Execution context invariant violated: {0}")]
    Invariant(#[from] ContextError),

    #[error("Error {action}: {source}")]
    Remote {
        action: String,
        #[source]
        source: RemoteError,
    },

    #[error("Provisioning hook failed: {0}")]
    Hook(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Step {step} panicked: {message}")]
    StepPanicked { step: String, message: String },

    #[error("Step {step} halted without recording an error")]
    HaltedWithoutError { step: String },

    #[error("SSH key generation failed: {0}")]
    KeyGeneration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn provider(action: impl Into<String>, source: ProviderError) -> Self {
        BuildError::Provider {
            action: action.into(),
            source,
        }
    }

    pub fn remote(action: impl Into<String>, source: RemoteError) -> Self {
        BuildError::Remote {
            action: action.into(),
            source,
        }
    }
}

/// Failure of a single compensating action. Never fatal to the run.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("{message}. Please remove it manually: {source}")]
    Provider {
        message: String,
        #[source]
        source: ProviderError,
    },

    #[error("Cleanup precondition failed: {0}")]
    Precondition(#[from] ContextError),

    #[error("Step {step} panicked during cleanup: {message}")]
    Panicked { step: String, message: String },
}

impl CleanupError {
    pub fn provider(message: impl Into<String>, source: ProviderError) -> Self {
        CleanupError::Provider {
            message: message.into(),
            source,
        }
    }
}

/// Step table construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("Context key {key} is produced by both {first} and {second}")]
    DuplicateProducer {
        key: String,
        first: String,
        second: String,
    },

    #[error("Step table is empty")]
    EmptyStepTable,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Configuration validation failed:\n{}", format_validation(.0))]
    Invalid(Vec<crate::config::ValidationError>),

    #[error("Logging configuration error: {0}")]
    Logging(String),
}

/// Errors surfaced by a CLI command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("Build failed: {error}")]
    Build {
        error: BuildError,
        cleanup_failures: usize,
    },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

fn format_validation(errors: &[crate::config::ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}
