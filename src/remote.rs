//! Remote control channel: console typing, file upload and remote commands.
//!
//! The wire protocols (VNC over websocket, SSH) live behind
//! [`RemoteControlChannel`]. The builder only sees key actions and paths.

use crate::error::RemoteError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub mod bootcmd;

pub use bootcmd::{Key, KeyAction};

/// Where to open a server console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEndpoint {
    pub url: String,
    pub token: String,
}

impl ConsoleEndpoint {
    /// Console websocket for `api_url` (scheme replaced by `wss`).
    pub fn for_api(api_url: &str, token: &str) -> Self {
        let host = api_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Self {
            url: format!("wss://{}/console/?token={}", host, token),
            token: token.to_string(),
        }
    }
}

/// SSH login for a helper or build server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_pem: Option<String>,
}

impl SshTarget {
    pub fn with_password(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: Some(password.into()),
            private_key_pem: None,
        }
    }
}

/// An open console session. Dropped sessions are closed by the implementation.
#[async_trait]
pub trait ConsoleSession: Send + Sync {
    async fn send(&mut self, action: &KeyAction) -> Result<(), RemoteError>;

    async fn close(&mut self) -> Result<(), RemoteError>;
}

/// Context handle type under which console sessions are stored.
pub type ConsoleHandle = Box<dyn ConsoleSession>;

#[async_trait]
pub trait RemoteControlChannel: Send + Sync {
    async fn open_console(&self, endpoint: &ConsoleEndpoint) -> Result<ConsoleHandle, RemoteError>;

    /// Copy `local` to `remote_path` on the target.
    async fn upload(&self, target: &SshTarget, local: &Path, remote_path: &str) -> Result<(), RemoteError>;

    async fn run_command(&self, target: &SshTarget, command: &str, timeout: Duration) -> Result<(), RemoteError>;
}

/// Channel used when no remote transport is compiled in. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRemoteChannel;

#[async_trait]
impl RemoteControlChannel for UnavailableRemoteChannel {
    async fn open_console(&self, endpoint: &ConsoleEndpoint) -> Result<ConsoleHandle, RemoteError> {
        Err(RemoteError::Unavailable(format!(
            "no console transport for {}",
            endpoint.url
        )))
    }

    async fn upload(&self, target: &SshTarget, local: &Path, _remote_path: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable(format!(
            "no SSH transport to upload {} to {}",
            local.display(),
            target.host
        )))
    }

    async fn run_command(&self, target: &SshTarget, _command: &str, _timeout: Duration) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable(format!(
            "no SSH transport to reach {}",
            target.host
        )))
    }
}
