use std::sync::Arc;

use rmcp::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde_json::{Value, json};

use crate::admin::{self, RegisterInput};
use crate::state::AppState;

/// Namespace reserved for the router's own control tools
const CONTROL_NAMESPACE: &str = "router";

/// The downstream-facing MCP server
///
/// Lists the registry's live catalog plus the built-in `router` control
/// tools, and routes calls through the credit gate.
#[derive(Clone)]
pub(crate) struct RouterService {
    state: AppState,
}

impl RouterService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn control_prefix(&self) -> String {
        format!("{CONTROL_NAMESPACE}{}", self.state.manager.separator())
    }

    fn control_tools(&self) -> Vec<Tool> {
        let sep = self.state.manager.separator();
        let name_only = json!({
            "type": "object",
            "properties": { "name": { "type": "string", "description": "Server name" } },
            "required": ["name"]
        });
        let empty = json!({ "type": "object", "properties": {} });
        let register = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Server name" },
                "url": { "type": "string", "description": "MCP endpoint URL" },
                "description": { "type": "string" },
                "enabled": { "type": "boolean" },
                "autoReconnect": { "type": "boolean" }
            },
            "required": ["name", "url"]
        });

        vec![
            control_tool(
                format!("{CONTROL_NAMESPACE}{sep}list-servers"),
                "List registered upstream servers and their connection status",
                &empty,
            ),
            control_tool(
                format!("{CONTROL_NAMESPACE}{sep}list-tools"),
                "List every aggregated tool currently re-exported",
                &empty,
            ),
            control_tool(
                format!("{CONTROL_NAMESPACE}{sep}register-server"),
                "Register a new upstream MCP server",
                &register,
            ),
            control_tool(
                format!("{CONTROL_NAMESPACE}{sep}unregister-server"),
                "Unregister an upstream server and remove its tools",
                &name_only,
            ),
            control_tool(
                format!("{CONTROL_NAMESPACE}{sep}reconnect-server"),
                "Tear down and re-establish one upstream connection",
                &name_only,
            ),
            control_tool(
                format!("{CONTROL_NAMESPACE}{sep}stats"),
                "Aggregate stats from every upstream exposing a stats tool",
                &empty,
            ),
        ]
    }

    async fn control_call(
        &self,
        action: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> CallToolResult {
        match action {
            "list-servers" => {
                let statuses = self.state.manager.server_statuses().await;
                json_result(&json!({ "servers": statuses }))
            }
            "list-tools" => {
                let tools = self.state.manager.all_tools().await;
                let listing: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "server": t.server_name,
                            "description": t.description,
                        })
                    })
                    .collect();
                json_result(&json!({ "tools": listing }))
            }
            "register-server" => {
                let input: RegisterInput =
                    match serde_json::from_value(Value::Object(arguments.unwrap_or_default())) {
                        Ok(input) => input,
                        Err(e) => return error_result("invalid_input", &e.to_string()),
                    };
                match admin::register_server(&self.state, input).await {
                    Ok(outcome) => json_result(&json!({
                        "message": outcome.message,
                        "server": outcome.status,
                    })),
                    Err(e) => error_result(&e.error_type, &e.message),
                }
            }
            "unregister-server" => match required_name(&arguments) {
                Some(name) => match admin::unregister_server(&self.state, &name).await {
                    Ok(removed) => json_result(&json!({
                        "message": format!("server '{name}' unregistered"),
                        "removedTools": removed,
                    })),
                    Err(e) => error_result(&e.error_type, &e.message),
                },
                None => error_result("invalid_input", "missing required argument: name"),
            },
            "reconnect-server" => match required_name(&arguments) {
                Some(name) => match admin::reconnect_server(&self.state, &name).await {
                    Ok(status) => json_result(&json!({ "server": status })),
                    Err(e) => error_result(&e.error_type, &e.message),
                },
                None => error_result("invalid_input", "missing required argument: name"),
            },
            "stats" => {
                let servers = self.state.manager.servers_with_stats_tool().await;
                let mut merged = serde_json::Map::new();
                for server in servers {
                    let value = match self.state.manager.call_stats_tool(&server).await {
                        Ok(result) => first_text_json(&result)
                            .unwrap_or_else(|| json!({ "error": "unparsable stats payload" })),
                        Err(e) => json!({ "error": e.to_string() }),
                    };
                    merged.insert(server, value);
                }
                json_result(&Value::Object(merged))
            }
            other => error_result(
                "tool_not_found",
                &format!("unknown router tool: {other}"),
            ),
        }
    }
}

impl ServerHandler for RouterService {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::default();
        server_info.name = self.state.config.router.name.clone();
        server_info.version = self.state.config.router.version.clone();

        ServerInfo {
            server_info,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            instructions: Some(
                "Aggregating MCP router. Upstream tools are exposed as \
                 {server}{separator}{tool}; router management lives under the \
                 'router' namespace."
                    .to_owned(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let mut tools = self.control_tools();
        tools.extend(self.state.registry.list_tools().await);

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let name = request.name.to_string();

        if let Some(action) = name.strip_prefix(&self.control_prefix()) {
            return Ok(self.control_call(action, request.arguments).await);
        }

        let Some((handler, shape)) = self.state.registry.lookup(&name).await else {
            return Ok(error_result(
                "tool_not_found",
                &format!("tool not found: {name}"),
            ));
        };

        if let Some(arguments) = &request.arguments
            && !shape.accepts(&Value::Object(arguments.clone()))
        {
            return Err(ErrorData::invalid_params(
                format!("arguments do not match the input schema of {name}"),
                None,
            ));
        }

        let Some((server, original)) = self.state.manager.split_tool_name(&name) else {
            return Ok(error_result(
                "tool_not_found",
                &format!("tool not found: {name}"),
            ));
        };

        let ctx = caller_context(&context);
        match self
            .state
            .gate
            .invoke(server, original, request.arguments, &ctx, &handler)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => Ok(error_result(e.error_type(), &e.to_string())),
        }
    }
}

/// Recover the HTTP caller identity from the rmcp request context
///
/// The streamable HTTP transport carries the request parts through the
/// context extensions; internal invocations fall back to an anonymous
/// context.
fn caller_context(context: &RequestContext<RoleServer>) -> relay_core::RequestContext {
    if let Some(parts) = context.extensions.get::<http::request::Parts>() {
        if let Some(ctx) = parts.extensions.get::<relay_core::RequestContext>() {
            return ctx.clone();
        }
        return crate::request_context::from_headers(&parts.headers);
    }
    relay_core::RequestContext::internal()
}

fn control_tool(name: String, description: &str, schema: &Value) -> Tool {
    let schema_object = schema.as_object().cloned().unwrap_or_default();
    Tool::new(name, description.to_owned(), Arc::new(schema_object))
}

fn json_result(value: &Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(value.to_string())])
}

fn error_result(error_type: &str, message: &str) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("{error_type}: {message}"))])
}

fn required_name(arguments: &Option<serde_json::Map<String, Value>>) -> Option<String> {
    arguments
        .as_ref()
        .and_then(|a| a.get("name"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn first_text_json(result: &CallToolResult) -> Option<Value> {
    let first = result.content.first()?;
    match &first.raw {
        rmcp::model::RawContent::Text(t) => serde_json::from_str(&t.text)
            .ok()
            .or_else(|| Some(Value::String(t.text.clone()))),
        _ => None,
    }
}
