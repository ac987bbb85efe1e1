//! Docker Engine API client over the local unix socket
//!
//! Opens one HTTP/1 connection per request. Requests carry a hard timeout so
//! a stuck daemon stalls a single event instead of the whole pipeline.

use super::{async_trait, ContainerRuntime, RuntimeError};
use crate::models::{ContainerSummary, LabelFilter, WorkloadMetadata};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{header, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, info};

/// Default Docker endpoint when `DOCKER_HOST` is not set
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Response parts the client cares about
struct RawResponse {
    status: StatusCode,
    api_version: Option<String>,
    body: Bytes,
}

#[derive(Debug, Deserialize)]
struct ListedContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct InspectedContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Config", default)]
    config: Option<InspectedConfig>,
}

#[derive(Debug, Deserialize)]
struct InspectedConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Docker runtime client
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
    /// `/v1.xx` prefix pinned from the daemon's ping response
    version_prefix: String,
    timeout: Duration,
}

impl DockerClient {
    /// Connect to the daemon at `docker_host` and negotiate the API version
    pub async fn connect(docker_host: &str, timeout: Duration) -> Result<Self, RuntimeError> {
        let socket_path = parse_docker_host(docker_host)?;
        let mut client = Self {
            socket_path,
            version_prefix: String::new(),
            timeout,
        };

        let ping = client.get("/_ping").await?;
        if !ping.status.is_success() {
            return Err(api_error(ping.status, &ping.body));
        }

        if let Some(version) = ping.api_version {
            client.version_prefix = format!("/v{}", version);
        }

        info!(
            socket = %client.socket_path.display(),
            api_version = %client.version_prefix,
            "Connected to Docker daemon"
        );

        Ok(client)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn get(&self, path_and_query: &str) -> Result<RawResponse, RuntimeError> {
        let uri = format!("{}{}", self.version_prefix, path_and_query);
        tokio::time::timeout(self.timeout, self.send(&uri))
            .await
            .map_err(|_| RuntimeError::Timeout(self.timeout))?
    }

    async fn send(&self, uri: &str) -> Result<RawResponse, RuntimeError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            RuntimeError::Transport(format!("connect {}: {}", self.socket_path.display(), e))
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(transport)?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Docker connection closed with error");
            }
        });

        let request = Request::builder()
            .uri(uri)
            .header(header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        debug!(uri = %uri, "Docker API request");
        let response = sender.send_request(request).await.map_err(transport)?;

        let status = response.status();
        let api_version = response
            .headers()
            .get("Api-Version")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(transport)?
            .to_bytes();

        Ok(RawResponse {
            status,
            api_version,
            body,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list_containers(
        &self,
        filters: &[LabelFilter],
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let labels: Vec<String> = filters.iter().map(ToString::to_string).collect();
        let filter_json = serde_json::json!({ "label": labels }).to_string();
        let encoded: String = url::form_urlencoded::byte_serialize(filter_json.as_bytes()).collect();

        let response = self
            .get(&format!("/containers/json?filters={}", encoded))
            .await?;
        if !response.status.is_success() {
            return Err(api_error(response.status, &response.body));
        }

        let listed: Vec<ListedContainer> = serde_json::from_slice(&response.body)?;
        Ok(listed
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id,
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_container(
        &self,
        container_id: &str,
    ) -> Result<WorkloadMetadata, RuntimeError> {
        // IDs come from log text; anything that is not a plain name cannot exist
        if container_id.is_empty()
            || !container_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(RuntimeError::NotFound(container_id.to_string()));
        }

        let response = self
            .get(&format!("/containers/{}/json", container_id))
            .await?;

        match response.status {
            StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(container_id.to_string())),
            status if status.is_success() => {
                let inspected: InspectedContainer = serde_json::from_slice(&response.body)?;
                let labels = inspected
                    .config
                    .and_then(|c| c.labels)
                    .unwrap_or_default();
                Ok(WorkloadMetadata::new(inspected.id, labels))
            }
            status => Err(api_error(status, &response.body)),
        }
    }
}

/// Resolve a `DOCKER_HOST` value to a socket path
fn parse_docker_host(docker_host: &str) -> Result<PathBuf, RuntimeError> {
    if let Some(path) = docker_host.strip_prefix("unix://") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    } else if docker_host.starts_with('/') {
        return Ok(PathBuf::from(docker_host));
    }

    Err(RuntimeError::UnsupportedEndpoint(docker_host.to_string()))
}

fn transport(e: hyper::Error) -> RuntimeError {
    RuntimeError::Transport(e.to_string())
}

fn api_error(status: StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());

    RuntimeError::Api {
        status: status.as_u16(),
        message,
    }
}
