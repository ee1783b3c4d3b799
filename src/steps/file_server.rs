//! Temporary HTTP file server for unattended installs.
//!
//! A helper server is booted from a stock Ubuntu template, the configured
//! files are copied to it over SSH and served with `python3 -m http.server`.
//! Its address is published to the boot command as `http_ip`/`http_port`.

use crate::cancel::CancelSignal;
use crate::context::{keys, ExecutionContext};
use crate::error::{BuildError, CleanupError, ProviderError, RemoteError};
use crate::provider::{
    tolerate, IpCreateRequest, IpFamily, PasswordType, ServerCreateRequest, StorageCreateRequest,
    StorageTemplate, StorageType, BENIGN_DELETE,
};
use crate::remote::SshTarget;
use crate::step::{BuildServices, Step, StepAction};
use crate::steps::Condition;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const FILE_SERVER_NAME: &str = "file-server";
pub const FILE_SERVER_TEMPLATE: &str = "Ubuntu 20.04 LTS (Focal Fossa)";
pub const FILE_SERVER_PASSWORD: &str = "file-server-gridscale";
pub const FILE_SERVER_PORT: u16 = 8080;

const BOOT_GRACE: Duration = Duration::from_secs(30);
const SERVE_TIMEOUT: Duration = Duration::from_secs(60);
const STOP_BENIGN: &[u16] = &[400, 404];

/// Expand the configured paths into `(local file, remote path)` pairs.
///
/// Directories are walked and only regular files are kept. The remote path
/// mirrors the local one so relative links in the served files keep working.
pub fn collect_uploads(paths: &[PathBuf]) -> Result<Vec<(PathBuf, String)>, BuildError> {
    let mut uploads = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false) {
                let entry = entry.map_err(std::io::Error::from)?;
                if entry.file_type().is_file() {
                    uploads.push(upload_entry(entry.path()));
                }
            }
        } else if path.is_file() {
            uploads.push(upload_entry(path));
        } else {
            return Err(BuildError::remote(
                "collecting files to serve",
                RemoteError::Upload {
                    path: path.display().to_string(),
                    message: "no such file or directory".to_string(),
                },
            ));
        }
    }
    Ok(uploads)
}

fn upload_entry(path: &Path) -> (PathBuf, String) {
    let remote = path.to_string_lossy().trim_start_matches('/').to_string();
    (path.to_path_buf(), remote)
}

/// Runs the helper file server for the lifetime of the build.
pub struct ServeHttpFiles {
    services: BuildServices,
}

impl ServeHttpFiles {
    pub fn new(services: BuildServices) -> Self {
        Self { services }
    }

    async fn serve(&self, ctx: &mut ExecutionContext, cancel: &CancelSignal) -> Result<(), BuildError> {
        let provider = self.services.provider.as_ref();
        let reporter = self.services.reporter.as_ref();
        let uploads = collect_uploads(&self.services.config.files)?;

        reporter.say("Creating file server...");
        let server = provider
            .create_server(&ServerCreateRequest {
                name: FILE_SERVER_NAME.to_string(),
                cores: 1,
                memory: 2,
            })
            .await
            .map_err(|e| BuildError::provider("creating file server", e))?
            .object_uuid;
        ctx.put(keys::FILE_SERVER_UUID, server.clone());

        let template_uuid = provider
            .template_by_name(FILE_SERVER_TEMPLATE)
            .await
            .map_err(|e| BuildError::provider("looking up file server template", e))?;
        let storage = provider
            .create_storage(&StorageCreateRequest {
                name: format!("{}-storage", FILE_SERVER_NAME),
                capacity: 10,
                storage_type: StorageType::Insane,
                template: Some(StorageTemplate {
                    template_uuid,
                    password: Some(FILE_SERVER_PASSWORD.to_string()),
                    password_type: Some(PasswordType::Plain),
                    hostname: Some(format!("{}-storage", FILE_SERVER_NAME)),
                    sshkeys: Vec::new(),
                }),
            })
            .await
            .map_err(|e| BuildError::provider("creating file server storage", e))?
            .object_uuid;
        ctx.put(keys::FILE_SERVER_STORAGE_UUID, storage.clone());

        let ip = provider
            .create_ip(&IpCreateRequest {
                name: format!("{}-IPv4", FILE_SERVER_NAME),
                family: IpFamily::V4,
            })
            .await
            .map_err(|e| BuildError::provider("creating file server IP address", e))?;
        ctx.put(keys::FILE_SERVER_IP_UUID, ip.object_uuid.clone());

        let network = ctx.require_id(keys::PUBLIC_NETWORK_UUID)?.to_string();
        let link = |e| BuildError::provider("linking file server", e);
        provider.link_storage(&server, &storage, true).await.map_err(link)?;
        provider.link_ip(&server, &ip.object_uuid).await.map_err(link)?;
        provider.link_network(&server, &network).await.map_err(link)?;
        provider
            .start_server(&server)
            .await
            .map_err(|e| BuildError::provider("starting file server", e))?;

        reporter.say("Waiting for the file server to boot...");
        cancel.sleep(BOOT_GRACE).await?;

        let target = SshTarget::with_password(ip.ip.clone(), "root", FILE_SERVER_PASSWORD);
        for (local, remote) in &uploads {
            debug!(local = %local.display(), remote = %remote, "uploading");
            self.services
                .remote
                .upload(&target, local, remote)
                .await
                .map_err(|e| BuildError::remote("uploading files to the file server", e))?;
        }
        self.services
            .remote
            .run_command(
                &target,
                &format!(
                    "nohup python3 -u -m http.server {} </dev/null >/dev/null 2>&1 &",
                    FILE_SERVER_PORT
                ),
                SERVE_TIMEOUT,
            )
            .await
            .map_err(|e| BuildError::remote("starting the HTTP server", e))?;

        ctx.put(keys::HTTP_IP, ip.ip.clone());
        ctx.put(keys::HTTP_PORT, FILE_SERVER_PORT);
        info!(ip = %ip.ip, files = uploads.len(), "file server ready");
        reporter.say(&format!(
            "a file server is ready at address: {}:{}",
            ip.ip, FILE_SERVER_PORT
        ));
        Ok(())
    }
}

#[async_trait]
impl Step for ServeHttpFiles {
    fn name(&self) -> &'static str {
        "ServeHttpFiles"
    }

    fn produces(&self) -> Vec<&'static str> {
        vec![
            keys::FILE_SERVER_UUID,
            keys::FILE_SERVER_STORAGE_UUID,
            keys::FILE_SERVER_IP_UUID,
            keys::HTTP_IP,
            keys::HTTP_PORT,
        ]
    }

    async fn run(&self, ctx: &mut ExecutionContext, cancel: &CancelSignal) -> StepAction {
        let condition = Condition::ServesFiles;
        if !condition.holds(&self.services.config) {
            self.services.reporter.say(condition.skip_reason());
            return StepAction::Continue;
        }
        match self.serve(ctx, cancel).await {
            Ok(()) => StepAction::Continue,
            Err(err) => self.services.halt(ctx, err),
        }
    }

    /// Each helper resource is removed independently. The first failure is
    /// returned after all three have been attempted.
    async fn cleanup(&self, ctx: &mut ExecutionContext) -> Result<(), CleanupError> {
        if !Condition::ServesFiles.holds(&self.services.config) {
            return Ok(());
        }
        let provider = self.services.provider.as_ref();
        let reporter = self.services.reporter.as_ref();
        let mut first: Option<CleanupError> = None;
        let mut note = |err: CleanupError| {
            reporter.error(&err.to_string());
            first.get_or_insert(err);
        };

        if let Some(server) = ctx.optional_id(keys::FILE_SERVER_UUID)?.map(str::to_string) {
            reporter.say(&format!("Destroying file server ({})...", server));
            if let Err(e) = tolerate(provider.stop_server(&server).await, STOP_BENIGN) {
                warn!(server = %server, error = %e, "stopping file server failed, deleting anyway");
            }
            match tolerate(provider.delete_server(&server).await, BENIGN_DELETE) {
                Ok(()) => {
                    ctx.remove(keys::FILE_SERVER_UUID);
                }
                Err(e) => note(destroy_error("file server", &server, e)),
            }
        }
        if let Some(storage) = ctx.optional_id(keys::FILE_SERVER_STORAGE_UUID)?.map(str::to_string) {
            reporter.say(&format!("Destroying file server storage ({})...", storage));
            match tolerate(provider.delete_storage(&storage).await, BENIGN_DELETE) {
                Ok(()) => {
                    ctx.remove(keys::FILE_SERVER_STORAGE_UUID);
                }
                Err(e) => note(destroy_error("file server storage", &storage, e)),
            }
        }
        if let Some(ip) = ctx.optional_id(keys::FILE_SERVER_IP_UUID)?.map(str::to_string) {
            reporter.say(&format!("Destroying file server IP address ({})...", ip));
            match tolerate(provider.delete_ip(&ip).await, BENIGN_DELETE) {
                Ok(()) => {
                    ctx.remove(keys::FILE_SERVER_IP_UUID);
                }
                Err(e) => note(destroy_error("file server IP address", &ip, e)),
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn destroy_error(label: &str, id: &str, source: ProviderError) -> CleanupError {
    CleanupError::provider(format!("Error destroying {} ({})", label, id), source)
}
