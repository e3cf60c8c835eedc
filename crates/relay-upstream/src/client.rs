use std::borrow::Cow;
use std::time::Duration;

use rmcp::model::{CallToolRequestParam, CallToolResult, ClientRequest, PingRequest, Tool};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt as _};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use tokio::sync::Mutex;

use crate::error::UpstreamError;

/// One upstream MCP connection over streamable HTTP
///
/// Requests go through a cloned `Peer`, so concurrent tool calls and
/// health-check pings never serialize on each other. The running
/// service is kept only for cancellation on close.
pub(crate) struct UpstreamClient {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    server_name: String,
    timeout: Duration,
}

impl UpstreamClient {
    /// Open a transport and complete the MCP handshake
    pub async fn connect(name: &str, url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let transport_config = StreamableHttpClientTransportConfig::with_uri(url.to_owned());
        let client = reqwest::Client::new();
        let transport = StreamableHttpClientTransport::with_client(client, transport_config);

        let service = tokio::time::timeout(timeout, ().serve(transport))
            .await
            .map_err(|_| UpstreamError::Timeout {
                server: name.to_owned(),
                ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| UpstreamError::Transport(format!("handshake failed for {name}: {e}")))?;

        tracing::info!(server = name, url, "connected to upstream MCP server");

        Ok(Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            server_name: name.to_owned(),
            timeout,
        })
    }

    /// List every tool the upstream advertises
    pub async fn list_tools(&self) -> Result<Vec<Tool>, UpstreamError> {
        self.with_deadline(self.peer.list_all_tools())
            .await?
            .map_err(|e| {
                UpstreamError::Transport(format!("list_tools failed on {}: {e}", self.server_name))
            })
    }

    /// Invoke one tool by its upstream (original) name
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, UpstreamError> {
        self.with_deadline(self.peer.call_tool(CallToolRequestParam {
            name: Cow::Owned(name.to_owned()),
            arguments,
        }))
        .await?
        .map_err(|e| {
            UpstreamError::Upstream(format!(
                "tool '{}' failed on {}: {e}",
                name, self.server_name
            ))
        })
    }

    /// MCP ping with the health loop's own deadline
    pub async fn ping(&self, deadline: Duration) -> Result<(), UpstreamError> {
        let request = ClientRequest::PingRequest(PingRequest::default());
        tokio::time::timeout(deadline, self.peer.send_request(request))
            .await
            .map_err(|_| UpstreamError::Timeout {
                server: self.server_name.clone(),
                ms: deadline.as_millis() as u64,
            })?
            .map_err(|e| {
                UpstreamError::Transport(format!("ping failed on {}: {e}", self.server_name))
            })?;
        Ok(())
    }

    /// Cancel the running service; safe to call with requests in flight
    pub async fn close(&self) {
        if let Some(service) = self.service.lock().await.take()
            && let Err(e) = service.cancel().await
        {
            tracing::debug!(server = %self.server_name, error = %e, "upstream close reported error");
        }
    }

    async fn with_deadline<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<Result<T, E>, UpstreamError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| UpstreamError::Timeout {
                server: self.server_name.clone(),
                ms: self.timeout.as_millis() as u64,
            })
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
