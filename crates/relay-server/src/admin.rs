use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};

use relay_store::{ServerEventRecord, ServerEventType, SyncEventType};
use relay_upstream::{ServerStatus, UpstreamConfig};

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /register` and of the `register-server` control tool
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterInput {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

fn default_true() -> bool {
    true
}

pub(crate) struct RegisterOutcome {
    pub status: ServerStatus,
    pub message: String,
}

/// `POST /register`
pub(crate) async fn register_handler(
    State(state): State<AppState>,
    Json(input): Json<RegisterInput>,
) -> Result<Json<Value>, ApiError> {
    let outcome = register_server(&state, input).await?;
    let stats = state.router_stats().await;

    Ok(Json(json!({
        "success": true,
        "message": outcome.message,
        "server": outcome.status,
        "stats": stats,
    })))
}

/// `DELETE /register/{server_name}`
pub(crate) async fn unregister_handler(
    State(state): State<AppState>,
    Path(server_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = unregister_server(&state, &server_name).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("server '{server_name}' unregistered"),
        "removedTools": removed,
    })))
}

/// Shared register flow: validate, detect conflicts, connect, register
/// tools, publish
pub(crate) async fn register_server(
    state: &AppState,
    input: RegisterInput,
) -> Result<RegisterOutcome, ApiError> {
    let name = input.name.trim().to_owned();
    validate_name(&name)?;
    let url = normalize_url(&input.url)?;

    // Conflict check against whatever we already know about this name
    if let Some(existing_url) = stored_url(state, &name).await? {
        if existing_url != url {
            return Err(ApiError::conflict(format!(
                "Name/URL conflict: server '{name}' is already registered with URL {existing_url}"
            )));
        }

        // Same name, same URL: no-op when connected, reconnect otherwise
        if state.manager.is_connected(&name).await {
            let status = current_status(state, &name).await?;
            return Ok(RegisterOutcome {
                status,
                message: format!("server '{name}' already registered and connected"),
            });
        }

        let status = state
            .manager
            .reconnect(&name)
            .await
            .map_err(|e| ApiError::from_domain(&e))?;
        if status.connected {
            let _ = state.registry.register_tools_for(&name).await;
        }
        publish(state, SyncEventType::Reconnected, json!({ "name": name })).await;
        return Ok(RegisterOutcome {
            status,
            message: format!("server '{name}' re-registered"),
        });
    }

    let mut config = UpstreamConfig::new(name.clone(), url);
    config.description = input.description;
    config.enabled = input.enabled;
    config.auto_reconnect = input.auto_reconnect;
    config.timeout_ms = state.config.router.timeout_ms;
    config.retry_attempts = state.config.router.retry_attempts;

    if !config.enabled {
        // Persist without connecting; disabled servers are not connected
        if let Some(repo) = &state.repository {
            repo.upsert(&config_to_new_server(&config))
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
        }
        record_event(state, ServerEventType::Registered, &name, Some(config_payload(&config)));
        publish(state, SyncEventType::Registered, config_payload(&config)).await;
        return Ok(RegisterOutcome {
            status: disabled_status(&config),
            message: format!("server '{name}' registered (disabled)"),
        });
    }

    let status = state.manager.connect(config.clone()).await;
    if status.connected {
        let _ = state.registry.register_tools_for(&name).await;
    }

    record_event(state, ServerEventType::Registered, &name, Some(config_payload(&config)));
    publish(state, SyncEventType::Registered, config_payload(&config)).await;

    let message = if status.connected {
        format!("server '{name}' registered with {} tools", status.tools_count)
    } else {
        format!(
            "server '{name}' registered; connection pending ({})",
            status.last_error.as_deref().unwrap_or("unknown error")
        )
    };

    Ok(RegisterOutcome { status, message })
}

/// Shared unregister flow: unregister tools, disconnect, soft-delete,
/// publish
pub(crate) async fn unregister_server(
    state: &AppState,
    name: &str,
) -> Result<Vec<String>, ApiError> {
    let tracked = state.manager.is_tracked(name).await;
    let record = match &state.repository {
        Some(repo) => repo
            .find_by_name(name)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?,
        None => None,
    };

    if !tracked && record.is_none() {
        return Err(ApiError::not_found(format!("server '{name}' not found")));
    }

    let removed = state.registry.unregister_tools_for(name).await;
    state.manager.disconnect(name).await;

    if let (Some(repo), Some(record)) = (&state.repository, &record)
        && let Err(e) = repo.soft_delete(record.id).await
    {
        tracing::warn!(server = name, error = %e, "soft delete failed");
    }

    record_event(
        state,
        ServerEventType::Unregistered,
        name,
        Some(json!({ "removed_tools": removed.len() })),
    );
    publish(state, SyncEventType::Unregistered, json!({ "name": name })).await;

    Ok(removed)
}

/// Shared reconnect flow used by the `reconnect-server` control tool
pub(crate) async fn reconnect_server(
    state: &AppState,
    name: &str,
) -> Result<ServerStatus, ApiError> {
    if !state.manager.is_tracked(name).await {
        let stored = match &state.repository {
            Some(repo) => repo
                .find_by_name(name)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?
                .is_some(),
            None => false,
        };
        if !stored {
            return Err(ApiError::not_found(format!("server '{name}' not found")));
        }
    }

    let status = state
        .manager
        .reconnect(name)
        .await
        .map_err(|e| ApiError::from_domain(&e))?;
    if status.connected {
        let _ = state.registry.register_tools_for(name).await;
    }
    publish(state, SyncEventType::Reconnected, json!({ "name": name })).await;

    Ok(status)
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::invalid_input("server name is required"));
    }
    let pattern = regex::Regex::new(relay_config::SERVER_NAME_PATTERN).expect("valid pattern");
    if !pattern.is_match(name) {
        return Err(ApiError::invalid_input(format!(
            "server name '{name}' must match {}",
            relay_config::SERVER_NAME_PATTERN
        )));
    }
    Ok(())
}

fn normalize_url(raw: &str) -> Result<String, ApiError> {
    let url = url::Url::parse(raw.trim())
        .map_err(|e| ApiError::invalid_input(format!("invalid URL: {e}")))?;
    Ok(url.to_string())
}

async fn stored_url(state: &AppState, name: &str) -> Result<Option<String>, ApiError> {
    let statuses = state.manager.server_statuses().await;
    if let Some(status) = statuses.iter().find(|s| s.name == name) {
        return Ok(Some(status.url.clone()));
    }

    if let Some(repo) = &state.repository {
        let record = repo
            .find_by_name(name)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        return Ok(record.map(|r| r.url));
    }

    Ok(None)
}

async fn current_status(state: &AppState, name: &str) -> Result<ServerStatus, ApiError> {
    state
        .manager
        .server_statuses()
        .await
        .into_iter()
        .find(|s| s.name == name)
        .ok_or_else(|| ApiError::not_found(format!("server '{name}' not found")))
}

fn disabled_status(config: &UpstreamConfig) -> ServerStatus {
    ServerStatus {
        name: config.name.clone(),
        url: config.url.clone(),
        connected: false,
        enabled: false,
        auto_reconnect: config.auto_reconnect,
        tools_count: 0,
        last_connected: None,
        last_error: None,
        consecutive_ping_failures: 0,
        reconnect_attempts: 0,
    }
}

fn config_payload(config: &UpstreamConfig) -> Value {
    json!({
        "server": {
            "name": config.name,
            "url": config.url,
            "description": config.description,
            "enabled": config.enabled,
            "auto_reconnect": config.auto_reconnect,
            "timeout_ms": config.timeout_ms,
            "retry_attempts": config.retry_attempts,
        }
    })
}

fn config_to_new_server(config: &UpstreamConfig) -> relay_store::NewServer {
    relay_store::NewServer {
        name: config.name.clone(),
        url: config.url.clone(),
        description: config.description.clone(),
        enabled: config.enabled,
        auto_reconnect: config.auto_reconnect,
        timeout_ms: config.timeout_ms as i64,
        retry_attempts: config.retry_attempts as i32,
    }
}

async fn publish(state: &AppState, event_type: SyncEventType, payload: Value) {
    if let Some(sync) = &state.sync {
        sync.publish(event_type, payload).await;
    }
}

fn record_event(
    state: &AppState,
    event_type: ServerEventType,
    server: &str,
    details: Option<Value>,
) {
    if let Some(events) = &state.events {
        events.record(ServerEventRecord {
            server_id: None,
            server_name: server.to_owned(),
            event_type,
            details,
        });
    }
}
