//! In-process mock MCP upstream served over streamable HTTP

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rmcp::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::streamable_http_server::session::never::NeverSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Which tools the mock upstream advertises
#[derive(Debug, Clone)]
pub struct UpstreamSpec {
    pub tools: Vec<&'static str>,
    /// Embed `models_metrics` in tool responses
    pub with_metrics: bool,
}

impl Default for UpstreamSpec {
    fn default() -> Self {
        Self {
            tools: vec!["add", "sub"],
            with_metrics: false,
        }
    }
}

#[derive(Clone)]
struct MockHandler {
    spec: UpstreamSpec,
}

impl MockHandler {
    fn number_arg(arguments: &Option<serde_json::Map<String, Value>>, key: &str) -> f64 {
        arguments
            .as_ref()
            .and_then(|a| a.get(key))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    fn arith_result(&self, value: f64) -> CallToolResult {
        let mut payload = json!({ "result": value });
        if self.spec.with_metrics {
            payload["models_metrics"] = json!([
                { "model": "m-large", "input_tokens": 120, "output_tokens": 30 },
                { "model": "m-small", "input_tokens": 30, "output_tokens": 10 }
            ]);
        }
        CallToolResult::success(vec![Content::text(payload.to_string())])
    }
}

impl ServerHandler for MockHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::default(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let schema = |props: Value, required: Value| {
            let full = json!({ "type": "object", "properties": props, "required": required });
            Arc::new(full.as_object().unwrap().clone())
        };

        let tools = self
            .spec
            .tools
            .iter()
            .map(|name| match *name {
                "add" => Tool::new(
                    "add".to_owned(),
                    "Add two numbers".to_owned(),
                    schema(
                        json!({ "a": { "type": "number" }, "b": { "type": "number" } }),
                        json!(["a", "b"]),
                    ),
                ),
                "sub" => Tool::new(
                    "sub".to_owned(),
                    "Subtract b from a".to_owned(),
                    schema(
                        json!({ "a": { "type": "number" }, "b": { "type": "number" } }),
                        json!(["a", "b"]),
                    ),
                ),
                other => Tool::new(
                    other.to_owned(),
                    format!("{other} tool"),
                    schema(json!({}), json!([])),
                ),
            })
            .collect();

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let name = request.name.as_ref();
        if !self.spec.tools.contains(&name) {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "unknown tool: {name}"
            ))]));
        }

        let result = match name {
            "add" => self.arith_result(
                Self::number_arg(&request.arguments, "a")
                    + Self::number_arg(&request.arguments, "b"),
            ),
            "sub" => self.arith_result(
                Self::number_arg(&request.arguments, "a")
                    - Self::number_arg(&request.arguments, "b"),
            ),
            "stats" => CallToolResult::success(vec![Content::text(
                json!({ "calls": 42, "status": "healthy" }).to_string(),
            )]),
            "quote" => CallToolResult::success(vec![Content::text(
                json!({
                    "success": true,
                    "estimated_cost": {
                        "model_id": "m",
                        "input_tokens": 1000,
                        "output_tokens": 500
                    }
                })
                .to_string(),
            )]),
            other => CallToolResult::success(vec![Content::text(
                json!({ "tool": other, "ok": true }).to_string(),
            )]),
        };

        Ok(result)
    }
}

/// A running mock upstream
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl MockUpstream {
    /// Serve the mock on an ephemeral port
    pub async fn start(spec: UpstreamSpec) -> anyhow::Result<Self> {
        let handler = MockHandler { spec };
        let service = StreamableHttpService::new(
            move || Ok(handler.clone()),
            Arc::new(NeverSessionManager::default()),
            StreamableHttpServerConfig {
                sse_keep_alive: Some(Duration::from_secs(15)),
                stateful_mode: false,
            },
        );

        let app = axum::Router::new().route_service("/mcp", service);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown })
    }

    /// Full MCP endpoint URL
    pub fn url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
