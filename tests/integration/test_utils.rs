//! Shared test utilities for integration tests
//!
//! A scriptable in-memory provider, a recording remote channel and helpers to
//! wire them into [`BuildServices`].

use async_trait::async_trait;
use gridbake::config::BuildConfig;
use gridbake::error::{ProviderError, RemoteError};
use gridbake::provider::{
    CreatedIp, CreatedResource, IpCreateRequest, IsoImageCreateRequest, ResourceProvider,
    ServerCreateRequest, ServerInfo, SnapshotCreateRequest, SshKeyCreateRequest,
    StorageCreateRequest, TemplateCreateRequest,
};
use gridbake::remote::{
    ConsoleEndpoint, ConsoleHandle, ConsoleSession, KeyAction, RemoteControlChannel, SshTarget,
};
use gridbake::reporter::RecordingReporter;
use gridbake::step::BuildServices;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// In-memory provider. Every call is logged as `"<operation> <args>"`.
///
/// Ids are handed out per kind: the first server is `srv1`, the first storage
/// `stg1`, the first snapshot `snap1` and so on.
#[derive(Default)]
pub struct MockProvider {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, (u16, String)>>,
    counters: Mutex<HashMap<&'static str, usize>>,
    powered: Mutex<HashMap<String, bool>>,
    shutdown_hangs: Mutex<bool>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call of `operation` fail with `status`.
    pub fn fail(&self, operation: &str, status: u16, message: &str) {
        self.failures
            .lock()
            .insert(operation.to_string(), (status, message.to_string()));
    }

    /// Make `shutdown_server` never return.
    pub fn hang_on_shutdown(&self) {
        *self.shutdown_hangs.lock() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls whose operation is `operation`.
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split_whitespace().next() == Some(operation))
            .collect()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    /// Position of `call` in the call log.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn is_powered(&self, server: &str) -> bool {
        self.powered.lock().get(server).copied().unwrap_or(false)
    }

    fn record(&self, operation: &str, args: &[&str]) -> Result<(), ProviderError> {
        let mut line = operation.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().push(line);
        match self.failures.lock().get(operation) {
            Some((status, message)) => Err(ProviderError::from_status(operation, *status, message.clone())),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &'static str) -> String {
        let mut counters = self.counters.lock();
        let n = counters.entry(prefix).or_insert(0);
        *n += 1;
        format!("{}{}", prefix, n)
    }

    fn created(&self, prefix: &'static str) -> CreatedResource {
        CreatedResource {
            object_uuid: self.next_id(prefix),
            request_uuid: None,
        }
    }
}

#[async_trait]
impl ResourceProvider for MockProvider {
    fn api_url(&self) -> &str {
        "https://api.test.local"
    }

    async fn public_network(&self) -> Result<String, ProviderError> {
        self.record("public_network", &[])?;
        Ok("net1".to_string())
    }

    async fn template_by_name(&self, name: &str) -> Result<String, ProviderError> {
        self.record("template_by_name", &[name])?;
        Ok("ubuntu-tpl".to_string())
    }

    async fn server(&self, server_uuid: &str) -> Result<ServerInfo, ProviderError> {
        self.record("server", &[server_uuid])?;
        Ok(ServerInfo {
            object_uuid: server_uuid.to_string(),
            power: self.is_powered(server_uuid),
            console_token: "console-token".to_string(),
        })
    }

    async fn create_server(&self, request: &ServerCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.record("create_server", &[request.name.as_str()])?;
        Ok(self.created("srv"))
    }

    async fn delete_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.record("delete_server", &[server_uuid])
    }

    async fn start_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.record("start_server", &[server_uuid])?;
        self.powered.lock().insert(server_uuid.to_string(), true);
        Ok(())
    }

    async fn stop_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.record("stop_server", &[server_uuid])?;
        self.powered.lock().insert(server_uuid.to_string(), false);
        Ok(())
    }

    async fn shutdown_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.record("shutdown_server", &[server_uuid])?;
        let hangs = *self.shutdown_hangs.lock();
        if hangs {
            std::future::pending::<()>().await;
        }
        self.powered.lock().insert(server_uuid.to_string(), false);
        Ok(())
    }

    async fn create_storage(&self, request: &StorageCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.record("create_storage", &[request.name.as_str()])?;
        Ok(self.created("stg"))
    }

    async fn delete_storage(&self, storage_uuid: &str) -> Result<(), ProviderError> {
        self.record("delete_storage", &[storage_uuid])
    }

    async fn create_snapshot(
        &self,
        storage_uuid: &str,
        request: &SnapshotCreateRequest,
    ) -> Result<CreatedResource, ProviderError> {
        self.record("create_snapshot", &[storage_uuid, request.name.as_str()])?;
        Ok(self.created("snap"))
    }

    async fn delete_snapshot(&self, storage_uuid: &str, snapshot_uuid: &str) -> Result<(), ProviderError> {
        self.record("delete_snapshot", &[storage_uuid, snapshot_uuid])
    }

    async fn create_ip(&self, request: &IpCreateRequest) -> Result<CreatedIp, ProviderError> {
        self.record("create_ip", &[request.name.as_str()])?;
        let id = self.next_id("ip");
        let n = id.trim_start_matches("ip").to_string();
        Ok(CreatedIp {
            object_uuid: id,
            ip: format!("10.0.0.{}", n),
        })
    }

    async fn delete_ip(&self, ip_uuid: &str) -> Result<(), ProviderError> {
        self.record("delete_ip", &[ip_uuid])
    }

    async fn create_iso_image(&self, request: &IsoImageCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.record("create_iso_image", &[request.source_url.as_str()])?;
        Ok(self.created("iso"))
    }

    async fn delete_iso_image(&self, iso_image_uuid: &str) -> Result<(), ProviderError> {
        self.record("delete_iso_image", &[iso_image_uuid])
    }

    async fn create_ssh_key(&self, _request: &SshKeyCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.record("create_ssh_key", &[])?;
        Ok(self.created("key"))
    }

    async fn delete_ssh_key(&self, ssh_key_uuid: &str) -> Result<(), ProviderError> {
        self.record("delete_ssh_key", &[ssh_key_uuid])
    }

    async fn create_template(&self, request: &TemplateCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.record("create_template", &[request.snapshot_uuid.as_str()])?;
        Ok(self.created("tpl"))
    }

    async fn delete_template(&self, template_uuid: &str) -> Result<(), ProviderError> {
        self.record("delete_template", &[template_uuid])
    }

    async fn link_storage(&self, server_uuid: &str, storage_uuid: &str, bootdevice: bool) -> Result<(), ProviderError> {
        let boot = if bootdevice { "boot" } else { "data" };
        self.record("link_storage", &[server_uuid, storage_uuid, boot])
    }

    async fn unlink_storage(&self, server_uuid: &str, storage_uuid: &str) -> Result<(), ProviderError> {
        self.record("unlink_storage", &[server_uuid, storage_uuid])
    }

    async fn link_ip(&self, server_uuid: &str, ip_uuid: &str) -> Result<(), ProviderError> {
        self.record("link_ip", &[server_uuid, ip_uuid])
    }

    async fn unlink_ip(&self, server_uuid: &str, ip_uuid: &str) -> Result<(), ProviderError> {
        self.record("unlink_ip", &[server_uuid, ip_uuid])
    }

    async fn link_network(&self, server_uuid: &str, network_uuid: &str) -> Result<(), ProviderError> {
        self.record("link_network", &[server_uuid, network_uuid])
    }

    async fn unlink_network(&self, server_uuid: &str, network_uuid: &str) -> Result<(), ProviderError> {
        self.record("unlink_network", &[server_uuid, network_uuid])
    }

    async fn link_iso_image(&self, server_uuid: &str, iso_image_uuid: &str) -> Result<(), ProviderError> {
        self.record("link_iso_image", &[server_uuid, iso_image_uuid])
    }

    async fn unlink_iso_image(&self, server_uuid: &str, iso_image_uuid: &str) -> Result<(), ProviderError> {
        self.record("unlink_iso_image", &[server_uuid, iso_image_uuid])
    }
}

/// Remote channel that records everything it is asked to do.
#[derive(Default)]
pub struct MockRemote {
    log: Arc<Mutex<Vec<String>>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

struct MockSession {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ConsoleSession for MockSession {
    async fn send(&mut self, action: &KeyAction) -> Result<(), RemoteError> {
        self.log.lock().push(format!("send {:?}", action));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.log.lock().push("close".to_string());
        Ok(())
    }
}

#[async_trait]
impl RemoteControlChannel for MockRemote {
    async fn open_console(&self, endpoint: &ConsoleEndpoint) -> Result<ConsoleHandle, RemoteError> {
        self.log.lock().push(format!("open {}", endpoint.url));
        Ok(Box::new(MockSession {
            log: Arc::clone(&self.log),
        }))
    }

    async fn upload(&self, target: &SshTarget, local: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.log
            .lock()
            .push(format!("upload {} {} {}", target.host, name, remote_path.ends_with(&name)));
        Ok(())
    }

    async fn run_command(&self, target: &SshTarget, command: &str, _timeout: Duration) -> Result<(), RemoteError> {
        self.log.lock().push(format!("run {} {}", target.host, command));
        Ok(())
    }
}

/// A valid ISO-based build configuration.
pub fn iso_config() -> BuildConfig {
    BuildConfig {
        api_token: "token".to_string(),
        api_key: "user".to_string(),
        template_name: "ubuntu-template".to_string(),
        server_name: "packer-build".to_string(),
        server_cores: 2,
        server_memory: 4,
        storage_capacity: 20,
        isoimage_url: "http://mirror.local/ubuntu.iso".to_string(),
        ssh_username: "root".to_string(),
        shutdown_timeout_secs: 5,
        ..BuildConfig::default()
    }
}

pub struct Harness {
    pub provider: Arc<MockProvider>,
    pub remote: Arc<MockRemote>,
    pub reporter: Arc<RecordingReporter>,
    pub services: BuildServices,
}

pub fn harness(config: BuildConfig) -> Harness {
    let provider = MockProvider::new();
    let remote = MockRemote::new();
    let reporter = Arc::new(RecordingReporter::new());
    let services = BuildServices::new(
        provider.clone(),
        remote.clone(),
        reporter.clone(),
        Arc::new(config),
    );
    Harness {
        provider,
        remote,
        reporter,
        services,
    }
}

/// Serializes tests that touch process environment variables.
static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Run `f` with `XDG_CONFIG_HOME` pointing at an empty directory, restoring it afterwards.
pub fn with_isolated_config_home<F, R>(f: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::TempDir::new().unwrap();
    let original = std::env::var_os("XDG_CONFIG_HOME");
    std::env::set_var("XDG_CONFIG_HOME", dir.path());
    let result = f(dir.path());
    match original {
        Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}
