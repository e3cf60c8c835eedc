use axum::Json;
use axum::extract::State;
use rmcp::model::RawContent;
use serde_json::{Map, Value, json};
use tower_http::cors::{Any, CorsLayer};

use relay_config::CorsConfig;

use crate::state::AppState;

/// `GET /stats`: fan out `stats` tool calls to every server exposing
/// one and merge the results per server
///
/// A failing server contributes an error string instead of failing the
/// whole response.
pub(crate) async fn stats_handler(State(state): State<AppState>) -> Json<Value> {
    let servers = state.manager.servers_with_stats_tool().await;
    let mut merged = Map::new();

    for server in servers {
        let value = match state.manager.call_stats_tool(&server).await {
            Ok(result) => parse_stats(&result)
                .unwrap_or_else(|| json!({ "error": "stats returned no parsable payload" })),
            Err(e) => json!({ "error": e.to_string() }),
        };
        merged.insert(server, value);
    }

    Json(Value::Object(merged))
}

fn parse_stats(result: &rmcp::model::CallToolResult) -> Option<Value> {
    let first = result.content.first()?;
    let RawContent::Text(text) = &first.raw else {
        return None;
    };
    serde_json::from_str(&text.text)
        .ok()
        .or_else(|| Some(Value::String(text.text.clone())))
}

/// `/stats` always permits any origin, independent of the configured
/// CORS policy
pub(crate) fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// CORS layer for the rest of the REST surface
pub(crate) fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.origins.is_empty() {
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<_> = config.origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer = layer.allow_origin(origins);
    }

    layer
}
