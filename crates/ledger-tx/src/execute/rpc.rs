//! JSON-RPC over HTTP node transport.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use serde::Deserialize;

use super::{
    NodeTransport, RpcMethod, TransportError, TransportErrorKind,
    pool::{ConnectionPool, Connector},
};
use crate::identity::NodeId;

/// Connect timeout applied to every node client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client bound to one node endpoint.
#[derive(Debug, Clone)]
pub struct NodeChannel {
    /// HTTP client used for this node.
    client: reqwest::Client,
    /// Target JSON-RPC endpoint URL.
    url: String,
}

/// Builds one [`NodeChannel`] per configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    /// Endpoint URL per node.
    endpoints: HashMap<NodeId, String>,
}

#[async_trait]
impl Connector for HttpConnector {
    type Connection = NodeChannel;

    async fn connect(&self, node_id: NodeId) -> Result<NodeChannel, TransportError> {
        let url = self.endpoints.get(&node_id).cloned().ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("no endpoint configured for node {node_id}"),
            )
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|error| TransportError::new(TransportErrorKind::Other, error.to_string()))?;
        Ok(NodeChannel { client, url })
    }
}

/// Transport posting base64-encoded request bytes to each node's JSON-RPC endpoint.
///
/// Channels are opened lazily, once per node, and shared by every execution using this
/// transport.
pub struct HttpNodeTransport {
    /// Per-node channels.
    pool: ConnectionPool<HttpConnector>,
}

impl HttpNodeTransport {
    /// Creates a transport for the given node endpoints.
    #[must_use]
    pub fn new(endpoints: HashMap<NodeId, String>) -> Self {
        Self {
            pool: ConnectionPool::new(HttpConnector { endpoints }),
        }
    }

    /// Returns the number of nodes with an open channel.
    #[must_use]
    pub fn connected_nodes(&self) -> usize {
        self.pool.connected()
    }
}

/// JSON-RPC envelope.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    /// Base64 response bytes for successful calls.
    result: Option<String>,
    /// Error payload for failed calls.
    error: Option<JsonRpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    /// JSON-RPC error code.
    code: i64,
    /// Human-readable message.
    message: String,
}

/// Maps an HTTP client error onto a transport failure class.
fn classify_http_error(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        return TransportErrorKind::DeadlineExceeded;
    }
    if error.is_connect() {
        return TransportErrorKind::Unavailable;
    }
    if let Some(status) = error.status() {
        return classify_http_status(status.as_u16());
    }
    if error.is_request() || error.is_body() {
        return TransportErrorKind::StreamReset;
    }
    TransportErrorKind::Other
}

/// Maps an HTTP status code onto a transport failure class.
const fn classify_http_status(code: u16) -> TransportErrorKind {
    match code {
        429 => TransportErrorKind::ResourceExhausted,
        502..=504 => TransportErrorKind::Unavailable,
        500..=599 => TransportErrorKind::Internal,
        _ => TransportErrorKind::Other,
    }
}

/// Maps a JSON-RPC error code onto a transport failure class.
const fn classify_rpc_code(code: i64) -> TransportErrorKind {
    match code {
        // Server-defined range reserved for transient overload.
        -32_005 => TransportErrorKind::ResourceExhausted,
        -32_603 => TransportErrorKind::Internal,
        _ => TransportErrorKind::Other,
    }
}

/// Converts a reqwest error into a transport error.
fn http_error(error: &reqwest::Error) -> TransportError {
    TransportError::new(classify_http_error(error), error.to_string())
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
    async fn send(
        &self,
        node_id: NodeId,
        method: RpcMethod,
        request: &[u8],
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let channel = self.pool.get(node_id).await?;
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method.as_str(),
            "params": [BASE64_STANDARD.encode(request)],
        });

        let mut call = channel.client.post(&channel.url).json(&payload);
        if let Some(deadline) = deadline {
            call = call.timeout(deadline);
        }
        let response = call.send().await.map_err(|error| http_error(&error))?;
        let response = response
            .error_for_status()
            .map_err(|error| http_error(&error))?;
        let parsed: JsonRpcResponse = response.json().await.map_err(|error| http_error(&error))?;

        if let Some(result) = parsed.result {
            return BASE64_STANDARD.decode(result).map_err(|error| {
                TransportError::new(
                    TransportErrorKind::Other,
                    format!("node {node_id} returned invalid base64: {error}"),
                )
            });
        }
        if let Some(error) = parsed.error {
            return Err(TransportError::new(
                classify_rpc_code(error.code),
                format!("rpc error {}: {}", error.code, error.message),
            ));
        }

        Err(TransportError::new(
            TransportErrorKind::Other,
            "rpc returned neither result nor error",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_statuses_map_to_transport_classes() {
        assert_eq!(classify_http_status(429), TransportErrorKind::ResourceExhausted);
        assert_eq!(classify_http_status(503), TransportErrorKind::Unavailable);
        assert_eq!(classify_http_status(500), TransportErrorKind::Internal);
        assert_eq!(classify_http_status(404), TransportErrorKind::Other);
        assert!(classify_http_status(503).is_retryable());
        assert!(!classify_http_status(500).is_retryable());
    }

    #[test]
    fn rpc_error_codes_map_to_transport_classes() {
        assert_eq!(classify_rpc_code(-32_005), TransportErrorKind::ResourceExhausted);
        assert_eq!(classify_rpc_code(-32_603), TransportErrorKind::Internal);
        assert_eq!(classify_rpc_code(-32_600), TransportErrorKind::Other);
    }

    #[tokio::test]
    async fn unknown_node_is_not_retryable() {
        let transport = HttpNodeTransport::new(HashMap::new());
        let result = transport
            .send(NodeId::from_num(3), RpcMethod::SubmitTransaction, b"tx", None)
            .await;
        assert!(matches!(result, Err(ref error) if error.kind == TransportErrorKind::Other));
        assert_eq!(transport.connected_nodes(), 0);
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0");
        assert!(listener.is_ok());
        let Ok(listener) = listener else {
            return;
        };
        let addr = listener.local_addr();
        assert!(addr.is_ok());
        let Ok(addr) = addr else {
            return;
        };
        drop(listener);

        let node = NodeId::from_num(3);
        let transport =
            HttpNodeTransport::new(HashMap::from([(node, format!("http://{addr}"))]));
        let result = transport
            .send(
                node,
                RpcMethod::SubmitTransaction,
                b"tx",
                Some(Duration::from_secs(2)),
            )
            .await;
        assert!(matches!(result, Err(ref error) if error.is_retryable()));
        assert_eq!(transport.connected_nodes(), 1);
    }
}
