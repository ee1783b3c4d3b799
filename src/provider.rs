//! Resource provider abstraction
//!
//! Narrow per-resource-kind operations over the cloud API. Steps only ever
//! talk to the platform through [`ResourceProvider`]; retry and backoff live
//! entirely inside the implementation.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod gridscale;

pub use gridscale::{parse_request_headers, GridscaleClient, GridscaleSettings};

/// Status codes meaning "already detached" during unlink.
pub const BENIGN_UNLINK: &[u16] = &[404, 409];

/// Status codes meaning "already gone" during delete.
pub const BENIGN_DELETE: &[u16] = &[404];

/// Status codes meaning "already powered off" during shutdown/stop.
pub const BENIGN_POWER_OFF: &[u16] = &[400];

/// Treat errors carrying one of `codes` as success.
pub fn tolerate(result: Result<(), ProviderError>, codes: &[u16]) -> Result<(), ProviderError> {
    match result {
        Err(err) if err.is_benign(codes) => {
            debug!(error = %err, "suppressing benign provider error");
            Ok(())
        }
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    #[serde(rename = "storage")]
    Standard,
    #[serde(rename = "storage_high")]
    High,
    #[serde(rename = "storage_insane")]
    Insane,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordType {
    Plain,
    Crypt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum IpFamily {
    V4,
    V6,
}

impl From<IpFamily> for u8 {
    fn from(family: IpFamily) -> Self {
        match family {
            IpFamily::V4 => 4,
            IpFamily::V6 => 6,
        }
    }
}

impl TryFrom<u8> for IpFamily {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(IpFamily::V4),
            6 => Ok(IpFamily::V6),
            other => Err(format!("unknown IP family {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCreateRequest {
    pub name: String,
    pub cores: u32,
    pub memory: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTemplate {
    pub template_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_type: Option<PasswordType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sshkeys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageCreateRequest {
    pub name: String,
    pub capacity: u32,
    pub storage_type: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<StorageTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpCreateRequest {
    pub name: String,
    pub family: IpFamily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsoImageCreateRequest {
    pub name: String,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeyCreateRequest {
    pub name: String,
    pub sshkey: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCreateRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCreateRequest {
    pub name: String,
    pub snapshot_uuid: String,
}

/// Identifier of a freshly created object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    pub object_uuid: String,
    #[serde(default)]
    pub request_uuid: Option<String>,
}

/// A created IP address and the address itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIp {
    pub object_uuid: String,
    pub ip: String,
}

/// The server properties the builder cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub object_uuid: String,
    pub power: bool,
    pub console_token: String,
}

/// Cloud API operations consumed by the build steps.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Base URL of the API, used to derive the console endpoint.
    fn api_url(&self) -> &str;

    // Lookups
    async fn public_network(&self) -> Result<String, ProviderError>;
    async fn template_by_name(&self, name: &str) -> Result<String, ProviderError>;
    async fn server(&self, server_uuid: &str) -> Result<ServerInfo, ProviderError>;

    // Servers
    async fn create_server(&self, request: &ServerCreateRequest) -> Result<CreatedResource, ProviderError>;
    async fn delete_server(&self, server_uuid: &str) -> Result<(), ProviderError>;
    async fn start_server(&self, server_uuid: &str) -> Result<(), ProviderError>;
    async fn stop_server(&self, server_uuid: &str) -> Result<(), ProviderError>;
    /// ACPI shutdown. Waits for the server to power off; callers bound it with a timeout.
    async fn shutdown_server(&self, server_uuid: &str) -> Result<(), ProviderError>;

    // Storages
    async fn create_storage(&self, request: &StorageCreateRequest) -> Result<CreatedResource, ProviderError>;
    async fn delete_storage(&self, storage_uuid: &str) -> Result<(), ProviderError>;
    async fn create_snapshot(
        &self,
        storage_uuid: &str,
        request: &SnapshotCreateRequest,
    ) -> Result<CreatedResource, ProviderError>;
    async fn delete_snapshot(&self, storage_uuid: &str, snapshot_uuid: &str) -> Result<(), ProviderError>;

    // IP addresses
    async fn create_ip(&self, request: &IpCreateRequest) -> Result<CreatedIp, ProviderError>;
    async fn delete_ip(&self, ip_uuid: &str) -> Result<(), ProviderError>;

    // ISO images
    async fn create_iso_image(&self, request: &IsoImageCreateRequest) -> Result<CreatedResource, ProviderError>;
    async fn delete_iso_image(&self, iso_image_uuid: &str) -> Result<(), ProviderError>;

    // SSH keys
    async fn create_ssh_key(&self, request: &SshKeyCreateRequest) -> Result<CreatedResource, ProviderError>;
    async fn delete_ssh_key(&self, ssh_key_uuid: &str) -> Result<(), ProviderError>;

    // Templates
    async fn create_template(&self, request: &TemplateCreateRequest) -> Result<CreatedResource, ProviderError>;
    async fn delete_template(&self, template_uuid: &str) -> Result<(), ProviderError>;

    // Relations
    async fn link_storage(&self, server_uuid: &str, storage_uuid: &str, bootdevice: bool) -> Result<(), ProviderError>;
    async fn unlink_storage(&self, server_uuid: &str, storage_uuid: &str) -> Result<(), ProviderError>;
    async fn link_ip(&self, server_uuid: &str, ip_uuid: &str) -> Result<(), ProviderError>;
    async fn unlink_ip(&self, server_uuid: &str, ip_uuid: &str) -> Result<(), ProviderError>;
    async fn link_network(&self, server_uuid: &str, network_uuid: &str) -> Result<(), ProviderError>;
    async fn unlink_network(&self, server_uuid: &str, network_uuid: &str) -> Result<(), ProviderError>;
    async fn link_iso_image(&self, server_uuid: &str, iso_image_uuid: &str) -> Result<(), ProviderError>;
    async fn unlink_iso_image(&self, server_uuid: &str, iso_image_uuid: &str) -> Result<(), ProviderError>;
}
