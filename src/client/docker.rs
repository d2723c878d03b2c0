//! Docker Engine API client.
//!
//! Speaks the swarm API over TCP (reqwest) or over the daemon's Unix socket
//! (hyper with a Unix connector). Both paths share request building, status
//! mapping and JSON decoding.

use super::{api_error, OrchestratorApi, ServiceSpec};
use crate::config::{ApiConfig, Endpoint};
use crate::error::{Result, SwarmwatchError};
use crate::types::{Availability, Node, NodeRole, NodeState, Revision, Service};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyperlocal::{UnixClientExt, UnixConnector};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

type UnixClient = hyper_util::client::legacy::Client<UnixConnector, Full<Bytes>>;

#[derive(Clone)]
enum Transport {
    Tcp { base_url: String, client: Client },
    Unix { socket: PathBuf, client: UnixClient },
}

/// Status and body of a completed exchange.
#[derive(Debug)]
struct RawResponse {
    status: u16,
    body: Bytes,
}

/// Client for a Docker Engine speaking the swarm API.
#[derive(Clone)]
pub struct DockerClient {
    endpoint: String,
    transport: Transport,
    call_timeout: Duration,
}

impl DockerClient {
    /// Create a client from the API section of the configuration.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let transport = match Endpoint::parse(&config.endpoint)? {
            Endpoint::Tcp(base_url) => {
                let client = Client::builder()
                    .connect_timeout(config.connect_timeout)
                    .timeout(config.call_timeout)
                    .build()
                    .map_err(|e| {
                        SwarmwatchError::Config(format!("Failed to build HTTP client: {}", e))
                    })?;
                Transport::Tcp { base_url, client }
            }
            Endpoint::Unix(socket) => Transport::Unix {
                socket,
                client: UnixClient::unix(),
            },
        };

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            transport,
            call_timeout: config.call_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn timeout_error(&self) -> SwarmwatchError {
        SwarmwatchError::Timeout(self.call_timeout.as_millis() as u64)
    }

    fn transport_error(&self, e: reqwest::Error) -> SwarmwatchError {
        if e.is_timeout() {
            self.timeout_error()
        } else {
            SwarmwatchError::ClusterUnreachable(e.to_string())
        }
    }

    /// Send one request and read the whole response body.
    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<RawResponse> {
        match &self.transport {
            Transport::Tcp { base_url, client } => {
                let mut request = client.request(method, format!("{}{}", base_url, path));
                if let Some(body) = body {
                    request = request
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(body);
                }
                let response = request.send().await.map_err(|e| self.transport_error(e))?;
                let status = response.status().as_u16();
                let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
                Ok(RawResponse { status, body })
            }
            Transport::Unix { socket, client } => {
                let mut request = hyper::Request::builder()
                    .method(method.as_str())
                    .uri(hyper::Uri::from(hyperlocal::Uri::new(socket, path)));
                if body.is_some() {
                    request = request.header("content-type", "application/json");
                }
                let request = request
                    .body(Full::new(Bytes::from(body.unwrap_or_default())))
                    .map_err(|e| SwarmwatchError::Internal(format!("Bad request: {}", e)))?;

                let exchange = async {
                    let response = client
                        .request(request)
                        .await
                        .map_err(|e| SwarmwatchError::ClusterUnreachable(e.to_string()))?;
                    let status = response.status().as_u16();
                    let body = response
                        .into_body()
                        .collect()
                        .await
                        .map_err(|e| SwarmwatchError::ClusterUnreachable(e.to_string()))?
                        .to_bytes();
                    Ok::<_, SwarmwatchError>(RawResponse { status, body })
                };
                tokio::time::timeout(self.call_timeout, exchange)
                    .await
                    .map_err(|_| self.timeout_error())?
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = check_status(self.send(Method::GET, path, None).await?)?;
        serde_json::from_slice(&response.body)
            .map_err(|e| SwarmwatchError::Deserialization(e.to_string()))
    }
}

/// Turn a non-success response into an error, reading Docker's `{"message": ...}` body.
fn check_status(response: RawResponse) -> Result<RawResponse> {
    if (200..300).contains(&response.status) {
        return Ok(response);
    }

    let body = String::from_utf8_lossy(&response.body).into_owned();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);

    Err(api_error(response.status, message))
}

#[async_trait]
impl OrchestratorApi for DockerClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let raw: Vec<RawNode> = self.get_json("/nodes").await?;
        debug!(count = raw.len(), "Listed nodes");
        Ok(raw.into_iter().map(RawNode::into_node).collect())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let raw: Vec<Value> = self.get_json("/services").await?;
        debug!(count = raw.len(), "Listed services");
        raw.into_iter()
            .map(|v| ServiceSpec::from_docker(v).map(|s| s.to_service()))
            .collect()
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceSpec> {
        let raw: Value = self.get_json(&format!("/services/{}", id)).await?;
        ServiceSpec::from_docker(raw)
    }

    async fn update_service(&self, id: &str, revision: Revision, spec: &Value) -> Result<()> {
        let path = format!("/services/{}/update?version={}", id, revision.0);
        let response = self
            .send(Method::POST, &path, Some(serde_json::to_vec(spec)?))
            .await?;

        check_status(response)?;
        debug!(service_id = %id, revision = %revision, "Service updated");
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNode {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    spec: RawNodeSpec,
    #[serde(default)]
    description: RawNodeDescription,
    #[serde(default)]
    status: RawNodeStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawNodeSpec {
    role: Option<String>,
    availability: Option<String>,
    labels: Option<HashMap<String, String>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawNodeDescription {
    hostname: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawNodeStatus {
    state: Option<String>,
}

impl RawNode {
    fn into_node(self) -> Node {
        let role = match self.spec.role.as_deref() {
            Some("manager") => NodeRole::Manager,
            _ => NodeRole::Worker,
        };
        // Anything we do not recognise is treated as unschedulable.
        let availability = match self.spec.availability.as_deref() {
            Some("active") => Availability::Active,
            Some("drain") => Availability::Drain,
            _ => Availability::Pause,
        };
        let state = match self.status.state.as_deref() {
            Some("ready") => NodeState::Ready,
            Some("down") => NodeState::Down,
            Some("disconnected") => NodeState::Disconnected,
            _ => NodeState::Unknown,
        };

        Node {
            hostname: self.description.hostname.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            role,
            availability,
            state,
            labels: self.spec.labels.unwrap_or_default(),
        }
    }
}
