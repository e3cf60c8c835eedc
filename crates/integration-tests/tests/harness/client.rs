//! Downstream MCP client helper for exercising the router endpoint

use std::borrow::Cow;

use rmcp::model::{CallToolRequestParam, CallToolResult, RawContent, Tool};
use rmcp::service::{RoleClient, RunningService, ServiceExt as _};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;

/// Connected downstream client
pub struct McpClient {
    service: RunningService<RoleClient, ()>,
}

impl McpClient {
    /// Connect without any identity headers
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        Self::connect_with(url, reqwest::Client::new()).await
    }

    /// Connect presenting an API key on every request
    pub async fn connect_with_api_key(url: &str, api_key: &str) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-api-key", reqwest::header::HeaderValue::from_str(api_key)?);
        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Self::connect_with(url, http).await
    }

    async fn connect_with(url: &str, http: reqwest::Client) -> anyhow::Result<Self> {
        let config = StreamableHttpClientTransportConfig::with_uri(url.to_owned());
        let transport = StreamableHttpClientTransport::with_client(http, config);
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| anyhow::anyhow!("downstream handshake failed: {e}"))?;
        Ok(Self { service })
    }

    pub async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        self.service
            .list_all_tools()
            .await
            .map_err(|e| anyhow::anyhow!("tools/list failed: {e}"))
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<CallToolResult> {
        self.service
            .call_tool(CallToolRequestParam {
                name: Cow::Owned(name.to_owned()),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .map_err(|e| anyhow::anyhow!("tools/call failed: {e}"))
    }

    pub async fn close(self) {
        let _ = self.service.cancel().await;
    }
}

/// First text payload of a tool result
pub fn first_text(result: &CallToolResult) -> Option<String> {
    result.content.first().and_then(|c| match &c.raw {
        RawContent::Text(t) => Some(t.text.clone()),
        _ => None,
    })
}
