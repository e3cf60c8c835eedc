use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::response::IntoResponse;
use axum::routing::post_service;
use http::StatusCode;
use rmcp::transport::streamable_http_server::session::never::NeverSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::json;

use crate::service::RouterService;
use crate::state::AppState;

/// Mount the downstream MCP endpoint
///
/// One route, POST only, stateless streaming transport. Any other
/// method gets an MCP-shaped 405.
pub(crate) fn mcp_routes(state: &AppState) -> axum::Router {
    let handler = RouterService::new(state.clone());
    let service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        Arc::new(NeverSessionManager::default()),
        StreamableHttpServerConfig {
            sse_keep_alive: Some(Duration::from_secs(15)),
            stateful_mode: false,
        },
    );

    axum::Router::new().route(
        &state.config.server.mcp_path,
        post_service(service).fallback(method_not_allowed),
    )
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "jsonrpc": "2.0",
            "error": { "code": -32000, "message": "Method not allowed." },
            "id": null,
        })),
    )
}
