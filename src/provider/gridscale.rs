//! gridscale REST client
//!
//! Every mutating call returns a `request_uuid`; the client polls
//! `/requests/{uuid}` until the platform reports the request done. Transient
//! statuses are retried with a fixed delay.

use crate::config::BuildConfig;
use crate::error::ProviderError;
use crate::provider::{
    CreatedIp, CreatedResource, IpCreateRequest, IsoImageCreateRequest, ResourceProvider,
    ServerCreateRequest, ServerInfo, SnapshotCreateRequest, SshKeyCreateRequest,
    StorageCreateRequest, TemplateCreateRequest,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.gridscale.io";

/// Statuses worth another attempt.
const RETRYABLE_STATUSES: &[u16] = &[424, 429, 500, 503];

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Parse `"key1:val1,key2:val2"` into header pairs. Empty input yields no headers.
pub fn parse_request_headers(raw: &str) -> Result<Vec<(String, String)>, ProviderError> {
    let mut headers = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (key, value) = entry.split_once(':').ok_or_else(|| {
            ProviderError::Config(format!("malformed request header '{}', expected key:value", entry))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProviderError::Config(format!(
                "request header '{}' has an empty name",
                entry
            )));
        }
        headers.push((key.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

/// Connection and polling settings for [`GridscaleClient`].
#[derive(Debug, Clone)]
pub struct GridscaleSettings {
    pub api_url: String,
    pub user_uuid: String,
    pub api_token: String,
    pub extra_headers: Vec<(String, String)>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl GridscaleSettings {
    pub fn new(user_uuid: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            user_uuid: user_uuid.into(),
            api_token: api_token.into(),
            extra_headers: Vec::new(),
            max_retries: 5,
            retry_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(600),
        }
    }

    pub fn from_build_config(config: &BuildConfig) -> Result<Self, ProviderError> {
        let mut settings = Self::new(&config.api_key, &config.api_token);
        if !config.api_url.is_empty() {
            settings.api_url = config.api_url.trim_end_matches('/').to_string();
        }
        settings.extra_headers = parse_request_headers(&config.api_request_headers)?;
        Ok(settings)
    }

    fn header_map(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        let pairs = [
            ("X-Auth-UserId".to_string(), self.user_uuid.clone()),
            ("X-Auth-Token".to_string(), self.api_token.clone()),
        ];
        for (key, value) in pairs.iter().chain(self.extra_headers.iter()) {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ProviderError::Config(format!("invalid header name {}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProviderError::Config(format!("invalid value for header {}: {}", key, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

fn map_http_error(operation: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(format!("{}: {}", operation, error))
    } else if error.is_connect() {
        ProviderError::Transport {
            operation: operation.to_string(),
            message: format!("Connection error: {}", error),
        }
    } else {
        ProviderError::Transport {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(operation: &str, value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Decode {
        operation: operation.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: ServerBody,
}

#[derive(Debug, Deserialize)]
struct ServerBody {
    object_uuid: String,
    #[serde(default)]
    power: bool,
    #[serde(default)]
    console_token: String,
}

#[derive(Debug, Deserialize)]
struct NetworkList {
    networks: HashMap<String, NetworkBody>,
}

#[derive(Debug, Deserialize)]
struct NetworkBody {
    object_uuid: String,
    #[serde(default)]
    public_net: bool,
}

#[derive(Debug, Deserialize)]
struct TemplateList {
    templates: HashMap<String, TemplateBody>,
}

#[derive(Debug, Deserialize)]
struct TemplateBody {
    object_uuid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RequestStatus {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP implementation of [`ResourceProvider`] against the gridscale API.
pub struct GridscaleClient {
    client: Client,
    settings: GridscaleSettings,
    headers: HeaderMap,
}

impl GridscaleClient {
    pub fn new(settings: GridscaleSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to create HTTP client: {}", e)))?;
        let headers = settings.header_map()?;
        Ok(Self {
            client,
            settings,
            headers,
        })
    }

    pub fn settings(&self) -> &GridscaleSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url.trim_end_matches('/'), path)
    }

    /// Send one request, retrying transient statuses. Returns the decoded body (`Null` when empty).
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        operation: &str,
    ) -> Result<Value, ProviderError> {
        let url = self.url(path);
        let mut attempt = 0u32;
        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.headers.clone());
            if let Some(body) = &body {
                request = request.json(body);
            }
            debug!(%method, %url, attempt, operation, "sending request");
            let response = request
                .send()
                .await
                .map_err(|e| map_http_error(operation, e))?;
            let status = response.status();

            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|e| map_http_error(operation, e))?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text).map_err(|e| ProviderError::Decode {
                    operation: operation.to_string(),
                    message: e.to_string(),
                });
            }

            let code = status.as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if RETRYABLE_STATUSES.contains(&code) && attempt < self.settings.max_retries {
                attempt += 1;
                warn!(operation, status = code, attempt, "transient API failure, retrying");
                tokio::time::sleep(self.settings.retry_delay).await;
                continue;
            }
            return Err(ProviderError::from_status(operation, code, message));
        }
    }

    /// Send a mutating request and wait until the platform finishes it.
    async fn mutate(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        operation: &str,
    ) -> Result<Value, ProviderError> {
        let response = self.send(method, path, body, operation).await?;
        if let Some(request_uuid) = response.get("request_uuid").and_then(Value::as_str) {
            self.wait_for_request(request_uuid, operation).await?;
        }
        Ok(response)
    }

    async fn wait_for_request(&self, request_uuid: &str, operation: &str) -> Result<(), ProviderError> {
        let deadline = Instant::now() + self.settings.request_timeout;
        let path = format!("/requests/{}", request_uuid);
        loop {
            let body = self.send(Method::GET, &path, None, operation).await?;
            let mut statuses: HashMap<String, RequestStatus> = decode(operation, body)?;
            if let Some(status) = statuses.remove(request_uuid) {
                match status.status.as_str() {
                    "done" => return Ok(()),
                    "failed" => {
                        return Err(ProviderError::RequestFailed {
                            request_uuid: request_uuid.to_string(),
                            message: status.message.unwrap_or_else(|| operation.to_string()),
                        })
                    }
                    _ => {}
                }
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::Timeout(format!(
                    "request {} of {} did not finish",
                    request_uuid, operation
                )));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn wait_for_power(&self, server_uuid: &str, desired: bool) -> Result<(), ProviderError> {
        let deadline = Instant::now() + self.settings.request_timeout;
        loop {
            if self.server(server_uuid).await?.power == desired {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::Timeout(format!(
                    "server {} did not reach power state {}",
                    server_uuid, desired
                )));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn set_power(&self, server_uuid: &str, power: bool, operation: &str) -> Result<(), ProviderError> {
        self.mutate(
            Method::PATCH,
            &format!("/objects/servers/{}/power", server_uuid),
            Some(json!({ "power": power })),
            operation,
        )
        .await?;
        self.wait_for_power(server_uuid, power).await
    }

    async fn create<T: serde::Serialize + Sync>(
        &self,
        path: &str,
        request: &T,
        operation: &str,
    ) -> Result<CreatedResource, ProviderError> {
        let body = serde_json::to_value(request).map_err(|e| ProviderError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        let response = self.mutate(Method::POST, path, Some(body), operation).await?;
        decode(operation, response)
    }

    async fn delete(&self, path: &str, operation: &str) -> Result<(), ProviderError> {
        self.mutate(Method::DELETE, path, None, operation).await.map(|_| ())
    }

    async fn relate(
        &self,
        server_uuid: &str,
        relation: &str,
        body: Value,
        operation: &str,
    ) -> Result<(), ProviderError> {
        self.mutate(
            Method::POST,
            &format!("/objects/servers/{}/{}", server_uuid, relation),
            Some(body),
            operation,
        )
        .await
        .map(|_| ())
    }

    async fn unrelate(
        &self,
        server_uuid: &str,
        relation: &str,
        object_uuid: &str,
        operation: &str,
    ) -> Result<(), ProviderError> {
        self.delete(
            &format!("/objects/servers/{}/{}/{}", server_uuid, relation, object_uuid),
            operation,
        )
        .await
    }
}

#[async_trait]
impl ResourceProvider for GridscaleClient {
    fn api_url(&self) -> &str {
        &self.settings.api_url
    }

    async fn public_network(&self) -> Result<String, ProviderError> {
        let body = self
            .send(Method::GET, "/objects/networks", None, "list networks")
            .await?;
        let list: NetworkList = decode("list networks", body)?;
        list.networks
            .into_values()
            .find(|n| n.public_net)
            .map(|n| n.object_uuid)
            .ok_or_else(|| ProviderError::NotFound("public network".to_string()))
    }

    async fn template_by_name(&self, name: &str) -> Result<String, ProviderError> {
        let body = self
            .send(Method::GET, "/objects/templates", None, "list templates")
            .await?;
        let list: TemplateList = decode("list templates", body)?;
        list.templates
            .into_values()
            .find(|t| t.name == name)
            .map(|t| t.object_uuid)
            .ok_or_else(|| ProviderError::NotFound(format!("template '{}'", name)))
    }

    async fn server(&self, server_uuid: &str) -> Result<ServerInfo, ProviderError> {
        let body = self
            .send(
                Method::GET,
                &format!("/objects/servers/{}", server_uuid),
                None,
                "get server",
            )
            .await?;
        let envelope: ServerEnvelope = decode("get server", body)?;
        Ok(ServerInfo {
            object_uuid: envelope.server.object_uuid,
            power: envelope.server.power,
            console_token: envelope.server.console_token,
        })
    }

    async fn create_server(&self, request: &ServerCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.create("/objects/servers", request, "create server").await
    }

    async fn delete_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/objects/servers/{}", server_uuid), "delete server")
            .await
    }

    async fn start_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.set_power(server_uuid, true, "start server").await
    }

    async fn stop_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.set_power(server_uuid, false, "stop server").await
    }

    async fn shutdown_server(&self, server_uuid: &str) -> Result<(), ProviderError> {
        self.mutate(
            Method::PATCH,
            &format!("/objects/servers/{}/shutdown", server_uuid),
            Some(json!({})),
            "shutdown server",
        )
        .await?;
        self.wait_for_power(server_uuid, false).await
    }

    async fn create_storage(&self, request: &StorageCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.create("/objects/storages", request, "create storage").await
    }

    async fn delete_storage(&self, storage_uuid: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/objects/storages/{}", storage_uuid), "delete storage")
            .await
    }

    async fn create_snapshot(
        &self,
        storage_uuid: &str,
        request: &SnapshotCreateRequest,
    ) -> Result<CreatedResource, ProviderError> {
        self.create(
            &format!("/objects/storages/{}/snapshots", storage_uuid),
            request,
            "create snapshot",
        )
        .await
    }

    async fn delete_snapshot(&self, storage_uuid: &str, snapshot_uuid: &str) -> Result<(), ProviderError> {
        self.delete(
            &format!("/objects/storages/{}/snapshots/{}", storage_uuid, snapshot_uuid),
            "delete snapshot",
        )
        .await
    }

    async fn create_ip(&self, request: &IpCreateRequest) -> Result<CreatedIp, ProviderError> {
        let body = serde_json::to_value(request).map_err(|e| ProviderError::Decode {
            operation: "create IP".to_string(),
            message: e.to_string(),
        })?;
        let response = self
            .mutate(Method::POST, "/objects/ips", Some(body), "create IP")
            .await?;
        decode("create IP", response)
    }

    async fn delete_ip(&self, ip_uuid: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/objects/ips/{}", ip_uuid), "delete IP").await
    }

    async fn create_iso_image(&self, request: &IsoImageCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.create("/objects/isoimages", request, "create ISO image").await
    }

    async fn delete_iso_image(&self, iso_image_uuid: &str) -> Result<(), ProviderError> {
        self.delete(
            &format!("/objects/isoimages/{}", iso_image_uuid),
            "delete ISO image",
        )
        .await
    }

    async fn create_ssh_key(&self, request: &SshKeyCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.create("/objects/sshkeys", request, "create SSH key").await
    }

    async fn delete_ssh_key(&self, ssh_key_uuid: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/objects/sshkeys/{}", ssh_key_uuid), "delete SSH key")
            .await
    }

    async fn create_template(&self, request: &TemplateCreateRequest) -> Result<CreatedResource, ProviderError> {
        self.create("/objects/templates", request, "create template").await
    }

    async fn delete_template(&self, template_uuid: &str) -> Result<(), ProviderError> {
        self.delete(
            &format!("/objects/templates/{}", template_uuid),
            "delete template",
        )
        .await
    }

    async fn link_storage(&self, server_uuid: &str, storage_uuid: &str, bootdevice: bool) -> Result<(), ProviderError> {
        self.relate(
            server_uuid,
            "storages",
            json!({ "object_uuid": storage_uuid, "bootdevice": bootdevice }),
            "link storage",
        )
        .await
    }

    async fn unlink_storage(&self, server_uuid: &str, storage_uuid: &str) -> Result<(), ProviderError> {
        self.unrelate(server_uuid, "storages", storage_uuid, "unlink storage")
            .await
    }

    async fn link_ip(&self, server_uuid: &str, ip_uuid: &str) -> Result<(), ProviderError> {
        self.relate(server_uuid, "ips", json!({ "object_uuid": ip_uuid }), "link IP")
            .await
    }

    async fn unlink_ip(&self, server_uuid: &str, ip_uuid: &str) -> Result<(), ProviderError> {
        self.unrelate(server_uuid, "ips", ip_uuid, "unlink IP").await
    }

    async fn link_network(&self, server_uuid: &str, network_uuid: &str) -> Result<(), ProviderError> {
        self.relate(
            server_uuid,
            "networks",
            json!({ "object_uuid": network_uuid }),
            "link network",
        )
        .await
    }

    async fn unlink_network(&self, server_uuid: &str, network_uuid: &str) -> Result<(), ProviderError> {
        self.unrelate(server_uuid, "networks", network_uuid, "unlink network")
            .await
    }

    async fn link_iso_image(&self, server_uuid: &str, iso_image_uuid: &str) -> Result<(), ProviderError> {
        self.relate(
            server_uuid,
            "isoimages",
            json!({ "object_uuid": iso_image_uuid }),
            "link ISO image",
        )
        .await
    }

    async fn unlink_iso_image(&self, server_uuid: &str, iso_image_uuid: &str) -> Result<(), ProviderError> {
        self.unrelate(server_uuid, "isoimages", iso_image_uuid, "unlink ISO image")
            .await
    }
}
