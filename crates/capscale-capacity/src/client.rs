//! HTTP client for the capacity admin API.
//!
//! Opens one HTTP/1 connection per request, which keeps the client free
//! of pooled state; reconciliation passes are infrequent enough that
//! connection reuse does not matter.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use tracing::debug;

use capscale_core::{CapacityMutator, CollaboratorResult};

use crate::error::{CapacityError, CapacityResult};

/// Request and response body of the instance endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCount {
    pub node_count: u32,
}

/// Capacity mutator backed by the remote admin API.
#[derive(Debug, Clone)]
pub struct HttpCapacityClient {
    /// `host:port` to connect to.
    address: String,
    /// Path prefix from the endpoint, without trailing slash.
    base_path: String,
    timeout: Duration,
}

impl HttpCapacityClient {
    /// Build a client for an endpoint like `http://10.0.0.5:9090` or
    /// `http://capacity.internal/admin`. Only plain `http` is supported.
    pub fn new(endpoint: &str, timeout: Duration) -> CapacityResult<Self> {
        let invalid = |reason: &str| CapacityError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = endpoint.parse().map_err(|_| invalid("not a valid URI"))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(_) => return Err(invalid("only http:// endpoints are supported")),
            None => return Err(invalid("missing scheme")),
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
        let base_path = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            address,
            base_path,
            timeout,
        })
    }

    /// Address the client connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn instance_path(&self, id: &str) -> String {
        format!("{}/v1/instances/{}", self.base_path, encode_segment(id))
    }

    /// Read the current node count of an instance.
    pub async fn get_node_count(&self, id: &str) -> CapacityResult<u32> {
        let body = self.send(Method::GET, &self.instance_path(id), None).await?;
        let parsed: NodeCount =
            serde_json::from_slice(&body).map_err(|e| CapacityError::Decode(e.to_string()))?;
        Ok(parsed.node_count)
    }

    /// Request a new node count for an instance.
    pub async fn set_node_count(&self, id: &str, nodes: u32) -> CapacityResult<()> {
        let payload = serde_json::to_vec(&NodeCount { node_count: nodes })
            .map_err(|e| CapacityError::Request(e.to_string()))?;
        self.send(Method::PUT, &self.instance_path(id), Some(payload))
            .await?;
        Ok(())
    }

    /// Send one request and return the body of a 2xx response.
    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> CapacityResult<Bytes> {
        let uri = format!("http://{}{}", self.address, path);
        debug!(%method, %uri, "capacity request");

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| CapacityError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| CapacityError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", &self.address)
                .header("user-agent", "capscale/0.1")
                .header("accept", "application/json");
            if body.is_some() {
                builder = builder.header("content-type", "application/json");
            }
            let req = builder
                .body(Full::new(Bytes::from(body.unwrap_or_default())))
                .map_err(|e| CapacityError::Request(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| CapacityError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| CapacityError::Decode(e.to_string()))?
                .to_bytes();
            Ok::<_, CapacityError>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| CapacityError::Timeout(self.timeout))??;

        if status.is_success() {
            return Ok(bytes);
        }
        debug!(%status, %uri, "capacity request rejected");
        Err(CapacityError::Status {
            status: status.as_u16(),
            body: error_body(status, &bytes),
        })
    }
}

#[async_trait]
impl CapacityMutator for HttpCapacityClient {
    async fn get_node_count(&self, id: &str) -> CollaboratorResult<u32> {
        Ok(HttpCapacityClient::get_node_count(self, id).await?)
    }

    async fn set_node_count(&self, id: &str, nodes: u32) -> CollaboratorResult<()> {
        Ok(HttpCapacityClient::set_node_count(self, id, nodes).await?)
    }
}

/// Short, single-line rendering of an error response body.
fn error_body(status: StatusCode, bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return status.canonical_reason().unwrap_or("").to_string();
    }
    text.chars().take(256).collect()
}

/// Percent-encode a path segment, leaving RFC 3986 unreserved bytes as-is.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
