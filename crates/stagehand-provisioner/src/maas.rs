//! MAAS REST client.
//!
//! Issues OAuth 1.0 PLAINTEXT-signed requests against the MAAS 1.0 API over
//! a plain HTTP/1 connection and reads node status codes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http_body_util::BodyExt;
use tracing::{debug, trace};

use stagehand_core::BoxFuture;

use crate::error::{ProvisionerError, ProvisionerResult};
use crate::status::NodeStatus;
use crate::watcher::Provisioner;

/// The three parts of a MAAS API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaasCredentials {
    pub consumer_key: String,
    pub token_key: String,
    pub token_secret: String,
}

impl MaasCredentials {
    /// Parse `consumer_key:token_key:token_secret`.
    pub fn parse(api_key: &str) -> ProvisionerResult<Self> {
        let parts: Vec<&str> = api_key.trim().split(':').collect();
        match parts.as_slice() {
            [consumer, key, secret] if !consumer.is_empty() && !key.is_empty() && !secret.is_empty() => {
                Ok(Self {
                    consumer_key: consumer.to_string(),
                    token_key: key.to_string(),
                    token_secret: secret.to_string(),
                })
            }
            _ => Err(ProvisionerError::InvalidApiKey),
        }
    }

    /// `Authorization` header value for one request.
    pub fn authorization(&self, nonce: &str, timestamp: u64) -> String {
        format!(
            "OAuth realm=\"\", oauth_version=\"1.0\", oauth_signature_method=\"PLAINTEXT\", \
             oauth_consumer_key=\"{}\", oauth_token=\"{}\", oauth_signature=\"%26{}\", \
             oauth_nonce=\"{nonce}\", oauth_timestamp=\"{timestamp}\"",
            self.consumer_key, self.token_key, self.token_secret
        )
    }
}

/// HTTP client for the MAAS node API.
#[derive(Debug)]
pub struct MaasClient {
    /// `host:port` to connect to.
    authority: String,
    /// Path prefix of the MAAS installation, e.g. `/MAAS`.
    base_path: String,
    credentials: MaasCredentials,
    timeout: Duration,
    nonce: AtomicU64,
}

impl MaasClient {
    /// Create a client for the MAAS server at `url` (e.g. `http://maas:5240/MAAS`).
    pub fn new(url: &str, api_key: &str) -> ProvisionerResult<Self> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ProvisionerError::InvalidUrl(format!("{url}: {e}")))?;
        match uri.scheme_str() {
            Some("http") => {}
            other => {
                return Err(ProvisionerError::InvalidUrl(format!(
                    "{url}: unsupported scheme {other:?}"
                )));
            }
        }
        let authority = uri
            .authority()
            .ok_or_else(|| ProvisionerError::InvalidUrl(format!("{url}: missing host")))?;
        let authority = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };

        Ok(Self {
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
            credentials: MaasCredentials::parse(api_key)?,
            timeout: Duration::from_secs(10),
            nonce: AtomicU64::new(0),
        })
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request path of the node resource for an instance id.
    pub fn node_path(&self, instance_id: &str) -> String {
        format!("{}/api/1.0/nodes/{}/", self.base_path, system_id(instance_id))
    }

    fn next_nonce(&self) -> String {
        let seq = self.nonce.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        format!("{nanos:08x}{seq:08x}")
    }

    /// GET `path` and decode the JSON body.
    async fn get_json(&self, path: &str) -> ProvisionerResult<serde_json::Value> {
        let uri = format!("http://{}{path}", self.authority);

        let result = tokio::time::timeout(self.timeout, async {
            let stream = tokio::net::TcpStream::connect(&self.authority)
                .await
                .map_err(|e| ProvisionerError::Connect {
                    address: self.authority.clone(),
                    reason: e.to_string(),
                })?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ProvisionerError::Connect {
                    address: self.authority.clone(),
                    reason: e.to_string(),
                })?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let req = http::Request::builder()
                .method("GET")
                .uri(&uri)
                .header("host", &self.authority)
                .header("accept", "application/json")
                .header("user-agent", "stagehand/0.1")
                .header(
                    "authorization",
                    self.credentials.authorization(&self.next_nonce(), timestamp),
                )
                .body(http_body_util::Empty::<bytes::Bytes>::new())
                .map_err(|e| ProvisionerError::InvalidUrl(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ProvisionerError::Connect {
                    address: self.authority.clone(),
                    reason: e.to_string(),
                })?;

            let status = resp.status();
            if !status.is_success() {
                debug!(status = %status, %uri, "provisioner request non-2xx");
                return Err(ProvisionerError::Http {
                    uri: uri.clone(),
                    status: status.as_u16(),
                });
            }

            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ProvisionerError::Decode(e.to_string()))?
                .to_bytes();
            serde_json::from_slice(&body).map_err(|e| ProvisionerError::Decode(e.to_string()))
        })
        .await;

        match result {
            Ok(value) => value,
            Err(_) => Err(ProvisionerError::Timeout { uri }),
        }
    }
}

impl Provisioner for MaasClient {
    fn node_status<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, ProvisionerResult<NodeStatus>> {
        Box::pin(async move {
            let node = self.get_json(&self.node_path(instance_id)).await?;
            let status = status_code(&node)?;
            trace!(%instance_id, %status, "node status");
            Ok(status)
        })
    }
}

/// System id from an instance id, which may be a full resource URI
/// (`/MAAS/api/1.0/nodes/node-abc/`) or already a bare system id.
pub fn system_id(instance_id: &str) -> &str {
    instance_id
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(instance_id)
}

/// Read the node's status code, preferring `substatus` over `status`.
fn status_code(node: &serde_json::Value) -> ProvisionerResult<NodeStatus> {
    ["substatus", "status"]
        .iter()
        .filter_map(|field| node.get(*field))
        .find_map(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(NodeStatus::from_code)
        .ok_or_else(|| ProvisionerError::Decode("node has no status code".to_string()))
}
