use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rmcp::model::{CallToolResult, Tool};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_core::RequestContext;
use relay_store::{
    AuditBuffer, CallStatus, EventBuffer, ServerEventRecord, ServerEventType, ServerRepository,
    ToolCallRecord,
};

use crate::client::UpstreamClient;
use crate::connection::{AggregatedTool, Connection, ServerStatus, UpstreamConfig};
use crate::error::UpstreamError;
use crate::health;

/// Original tool names consumed internally and never re-exported
const CONTROL_TOOLS: [&str; 2] = ["stats", "quote"];

/// Tunables for the connection manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Separator between server name and original tool name
    pub separator: String,
    /// Health-check loop interval
    pub ping_interval: Duration,
    /// Consecutive ping failures before a server is marked disconnected
    pub max_ping_failures: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            separator: ":".to_owned(),
            ping_interval: Duration::from_secs(30),
            max_ping_failures: 3,
        }
    }
}

struct HealthHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) struct ManagerInner {
    pub(crate) settings: ManagerSettings,
    pub(crate) connections: RwLock<HashMap<String, Connection>>,
    connect_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    repository: Option<ServerRepository>,
    audit: Option<AuditBuffer>,
    events: Option<EventBuffer>,
    health: Mutex<Option<HealthHandle>>,
}

/// Owns every upstream connection and the health-check loop
///
/// Cheap to clone. All mutation of connection state goes through this
/// type; readers receive snapshots.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        settings: ManagerSettings,
        repository: Option<ServerRepository>,
        audit: Option<AuditBuffer>,
        events: Option<EventBuffer>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                settings,
                connections: RwLock::new(HashMap::new()),
                connect_locks: Mutex::new(HashMap::new()),
                repository,
                audit,
                events,
                health: Mutex::new(None),
            }),
        }
    }

    pub fn separator(&self) -> &str {
        &self.inner.settings.separator
    }

    pub(crate) fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub(crate) fn inner(&self) -> &ManagerInner {
        &self.inner
    }

    /// Split a namespaced tool name at the first separator occurrence
    pub fn split_tool_name<'a>(&self, namespaced: &'a str) -> Option<(&'a str, &'a str)> {
        namespaced.split_once(self.separator())
    }

    /// Connect to an upstream, discover its tools, and track the result
    ///
    /// Never fails: a refused connection is recorded as a disconnected
    /// entry with `last_error` set, so listings stay complete and the
    /// health loop can retry.
    pub async fn connect(&self, config: UpstreamConfig) -> ServerStatus {
        let name = config.name.clone();
        let lock = self.name_lock(&name).await;
        let _guard = lock.lock().await;

        if let Some(repo) = &self.inner.repository
            && let Err(e) = repo.upsert(&config.to_new_server()).await
        {
            tracing::warn!(server = %name, error = %e, "failed to persist server config");
        }

        let timeout = Duration::from_millis(config.timeout_ms);
        match UpstreamClient::connect(&name, &config.url, timeout).await {
            Ok(client) => {
                let client = Arc::new(client);
                let (tools, control_tools, discovery_error) =
                    self.discover(&config, &client).await;
                let tool_count = tools.len();

                let status = {
                    let mut conns = self.inner.connections.write().await;
                    let entry = Connection {
                        config,
                        client: Some(client),
                        tools,
                        control_tools,
                        last_connected: Some(Utc::now()),
                        last_error: discovery_error,
                        consecutive_ping_failures: 0,
                        reconnect_attempts: 0,
                        last_reconnect_attempt: None,
                        last_error_from_ping: false,
                    };
                    let status = entry.status();
                    conns.insert(name.clone(), entry);
                    status
                };

                self.emit(
                    ServerEventType::Connected,
                    &name,
                    Some(json!({ "url": status.url, "tools": tool_count })),
                );
                if tool_count > 0 {
                    self.emit(
                        ServerEventType::ToolLoaded,
                        &name,
                        Some(json!({ "count": tool_count })),
                    );
                }
                self.ensure_health_loop().await;
                status
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "upstream connect failed");
                let status = {
                    let mut conns = self.inner.connections.write().await;
                    let prior_attempts =
                        conns.get(&name).map_or(0, |c| c.reconnect_attempts);
                    let entry = Connection {
                        config,
                        client: None,
                        tools: Vec::new(),
                        control_tools: HashSet::new(),
                        last_connected: conns.get(&name).and_then(|c| c.last_connected),
                        last_error: Some(e.to_string()),
                        consecutive_ping_failures: 0,
                        reconnect_attempts: prior_attempts + 1,
                        last_reconnect_attempt: Some(Instant::now()),
                        last_error_from_ping: false,
                    };
                    let status = entry.status();
                    conns.insert(name.clone(), entry);
                    status
                };

                self.emit(
                    ServerEventType::Error,
                    &name,
                    Some(json!({ "error": status.last_error })),
                );
                self.ensure_health_loop().await;
                status
            }
        }
    }

    /// Close and forget one connection; marks the stored row disabled
    ///
    /// Unknown names are a no-op.
    pub async fn disconnect(&self, name: &str) -> bool {
        let removed = self.inner.connections.write().await.remove(name);
        let Some(conn) = removed else {
            return false;
        };

        if let Some(client) = conn.client {
            client.close().await;
        }

        self.emit(ServerEventType::Disconnected, name, None);

        if let Some(repo) = &self.inner.repository
            && let Err(e) = repo.set_enabled(name, false).await
        {
            tracing::warn!(server = name, error = %e, "failed to disable stored server");
        }

        true
    }

    /// Tear down any existing transport and connect afresh
    pub async fn reconnect(&self, name: &str) -> Result<ServerStatus, UpstreamError> {
        let config = match self.stored_config(name).await? {
            Some(config) => config,
            None => {
                return Err(UpstreamError::ServerNotFound {
                    server: name.to_owned(),
                });
            }
        };

        let removed = self.inner.connections.write().await.remove(name);
        if let Some(conn) = removed
            && let Some(client) = conn.client
        {
            client.close().await;
        }

        Ok(self.connect(config).await)
    }

    /// Re-discover the tool list for a connected server (idempotent)
    ///
    /// On discovery failure the server stays connected with an empty
    /// tool list and `last_error` set.
    pub async fn build_tools(&self, name: &str) -> Result<usize, UpstreamError> {
        let client = self.connected_client(name).await?;

        match client.list_tools().await {
            Ok(tools) => {
                let config = self
                    .stored_config(name)
                    .await?
                    .ok_or_else(|| UpstreamError::ServerNotFound {
                        server: name.to_owned(),
                    })?;
                let (tools, control_tools) =
                    build_aggregated(&config.name, self.separator(), tools);
                let count = tools.len();

                let mut conns = self.inner.connections.write().await;
                if let Some(entry) = conns.get_mut(name) {
                    entry.tools = tools;
                    entry.control_tools = control_tools;
                    entry.last_error = None;
                }
                drop(conns);

                self.emit(
                    ServerEventType::ToolLoaded,
                    name,
                    Some(json!({ "count": count })),
                );
                Ok(count)
            }
            Err(e) => {
                let mut conns = self.inner.connections.write().await;
                if let Some(entry) = conns.get_mut(name) {
                    entry.tools.clear();
                    entry.control_tools.clear();
                    entry.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Forward a namespaced tool call to its owning upstream
    ///
    /// Unknown-but-stored servers are lazily connected; known but
    /// disconnected servers get one reconnect attempt. Every return
    /// path produces an audit row.
    pub async fn call_tool(
        &self,
        namespaced: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ctx: &RequestContext,
    ) -> Result<CallToolResult, UpstreamError> {
        let started = Instant::now();

        let Some((server, original)) = self.split_tool_name(namespaced) else {
            let err = UpstreamError::ToolNotFound {
                tool: namespaced.to_owned(),
            };
            self.audit(ctx, "", namespaced, &arguments, Err(&err), started);
            return Err(err);
        };

        let result = self.forward(server, original, arguments.clone()).await;
        self.audit(ctx, server, original, &arguments, result.as_ref(), started);
        result
    }

    /// True when the server currently re-exports `original`
    ///
    /// Control tools are filtered out at aggregation time, so this is
    /// always false for `stats` and `quote`.
    pub async fn has_tool(&self, server: &str, original: &str) -> bool {
        let conns = self.inner.connections.read().await;
        conns
            .get(server)
            .is_some_and(|c| c.tools.iter().any(|t| t.original_name == original))
    }

    /// True when the upstream exposed a `quote` tool at discovery
    pub async fn has_quote_tool(&self, server: &str) -> bool {
        let conns = self.inner.connections.read().await;
        conns.get(server).is_some_and(|c| c.control_tools.contains("quote"))
    }

    /// Connected servers that exposed a `stats` tool at discovery
    pub async fn servers_with_stats_tool(&self) -> Vec<String> {
        let conns = self.inner.connections.read().await;
        let mut names: Vec<String> = conns
            .values()
            .filter(|c| c.connected() && c.control_tools.contains("stats"))
            .map(|c| c.config.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Invoke the upstream's `stats` control tool
    pub async fn call_stats_tool(&self, server: &str) -> Result<CallToolResult, UpstreamError> {
        self.forward(server, "stats", None).await
    }

    /// Invoke the upstream's `quote` control tool
    pub async fn call_quote_tool(
        &self,
        server: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, UpstreamError> {
        self.forward(server, "quote", Some(arguments)).await
    }

    /// Issue an MCP ping against one connected server
    pub async fn ping(&self, name: &str) -> Result<(), UpstreamError> {
        let client = self.connected_client(name).await?;
        client.ping(health::PING_DEADLINE).await
    }

    /// Aggregated tools for one server (already control-filtered)
    pub async fn tools_for(&self, server: &str) -> Option<Vec<AggregatedTool>> {
        let conns = self.inner.connections.read().await;
        conns.get(server).map(|c| c.tools.clone())
    }

    /// The whole downstream-facing catalog, name-ordered
    pub async fn all_tools(&self) -> Vec<AggregatedTool> {
        let conns = self.inner.connections.read().await;
        let mut tools: Vec<AggregatedTool> =
            conns.values().flat_map(|c| c.tools.iter().cloned()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// One status snapshot per tracked server, name-ordered
    pub async fn server_statuses(&self) -> Vec<ServerStatus> {
        let conns = self.inner.connections.read().await;
        let mut statuses: Vec<ServerStatus> = conns.values().map(Connection::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Whether a connection object exists for this name
    pub async fn is_tracked(&self, name: &str) -> bool {
        self.inner.connections.read().await.contains_key(name)
    }

    /// Whether this name is currently connected
    pub async fn is_connected(&self, name: &str) -> bool {
        let conns = self.inner.connections.read().await;
        conns.get(name).is_some_and(Connection::connected)
    }

    /// Stop the health loop and close every transport in parallel
    pub async fn disconnect_all(&self) {
        self.stop_health_loop().await;

        let entries: Vec<Connection> = {
            let mut conns = self.inner.connections.write().await;
            conns.drain().map(|(_, c)| c).collect()
        };

        let closes = entries
            .into_iter()
            .filter_map(|c| c.client)
            .map(|client| async move { client.close().await });
        futures::future::join_all(closes).await;
    }

    // --- internals -----------------------------------------------------

    async fn forward(
        &self,
        server: &str,
        original: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, UpstreamError> {
        let client = self.usable_client(server).await?;
        client.call_tool(original, arguments).await
    }

    /// Resolve a client, lazily connecting or reconnecting once
    async fn usable_client(&self, server: &str) -> Result<Arc<UpstreamClient>, UpstreamError> {
        enum State {
            Ready(Arc<UpstreamClient>),
            Known,
            Unknown,
        }

        let state = {
            let conns = self.inner.connections.read().await;
            match conns.get(server) {
                Some(c) => c.client.clone().map_or(State::Known, State::Ready),
                None => State::Unknown,
            }
        };

        match state {
            State::Ready(client) => Ok(client),
            State::Known => {
                // One reconnect attempt before giving up
                let status = self.reconnect(server).await?;
                if !status.connected {
                    return Err(UpstreamError::ServerDisconnected {
                        server: server.to_owned(),
                    });
                }
                self.connected_client(server).await
            }
            State::Unknown => {
                let Some(repo) = &self.inner.repository else {
                    return Err(UpstreamError::ServerNotFound {
                        server: server.to_owned(),
                    });
                };
                let Some(record) = repo.find_by_name(server).await? else {
                    return Err(UpstreamError::ServerNotFound {
                        server: server.to_owned(),
                    });
                };
                if !record.enabled {
                    return Err(UpstreamError::ServerNotFound {
                        server: server.to_owned(),
                    });
                }
                let status = self.connect((&record).into()).await;
                if !status.connected {
                    return Err(UpstreamError::ServerDisconnected {
                        server: server.to_owned(),
                    });
                }
                self.connected_client(server).await
            }
        }
    }

    pub(crate) async fn connected_client(
        &self,
        server: &str,
    ) -> Result<Arc<UpstreamClient>, UpstreamError> {
        let conns = self.inner.connections.read().await;
        match conns.get(server) {
            Some(c) => c.client.clone().ok_or_else(|| UpstreamError::ServerDisconnected {
                server: server.to_owned(),
            }),
            None => Err(UpstreamError::ServerNotFound {
                server: server.to_owned(),
            }),
        }
    }

    async fn stored_config(&self, name: &str) -> Result<Option<UpstreamConfig>, UpstreamError> {
        {
            let conns = self.inner.connections.read().await;
            if let Some(conn) = conns.get(name) {
                return Ok(Some(conn.config.clone()));
            }
        }

        if let Some(repo) = &self.inner.repository
            && let Some(record) = repo.find_by_name(name).await?
        {
            return Ok(Some((&record).into()));
        }

        Ok(None)
    }

    async fn discover(
        &self,
        config: &UpstreamConfig,
        client: &Arc<UpstreamClient>,
    ) -> (Vec<AggregatedTool>, HashSet<String>, Option<String>) {
        match client.list_tools().await {
            Ok(tools) => {
                let (tools, control) = build_aggregated(&config.name, self.separator(), tools);
                (tools, control, None)
            }
            Err(e) => {
                tracing::warn!(server = %config.name, error = %e, "tool discovery failed");
                (Vec::new(), HashSet::new(), Some(e.to_string()))
            }
        }
    }

    fn audit(
        &self,
        ctx: &RequestContext,
        server: &str,
        tool: &str,
        arguments: &Option<serde_json::Map<String, serde_json::Value>>,
        result: Result<&CallToolResult, &UpstreamError>,
        started: Instant,
    ) {
        let Some(audit) = &self.inner.audit else {
            return;
        };

        let (status, response, error_message) = match result {
            Ok(r) => (CallStatus::Success, serde_json::to_value(r).ok(), None),
            Err(e) => (CallStatus::Error, None, Some(e.to_string())),
        };

        audit.record(ToolCallRecord {
            server_name: server.to_owned(),
            tool_name: tool.to_owned(),
            arguments: arguments.clone().map(serde_json::Value::Object),
            response,
            duration_ms: started.elapsed().as_millis() as i64,
            status,
            error_message,
            user_id: ctx.caller.user_id.clone(),
            user_email: ctx.caller.user_email.clone(),
            api_key_prefix: ctx.api_key_prefix(),
        });
    }

    pub(crate) fn emit(
        &self,
        event_type: ServerEventType,
        server: &str,
        details: Option<serde_json::Value>,
    ) {
        if let Some(events) = &self.inner.events {
            events.record(ServerEventRecord {
                server_id: None,
                server_name: server.to_owned(),
                event_type,
                details,
            });
        }
    }

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.connect_locks.lock().await;
        Arc::clone(locks.entry(name.to_owned()).or_default())
    }

    fn ensure_health_loop(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut slot = self.inner.health.lock().await;
            if slot.is_some() {
                return;
            }
            let cancel = CancellationToken::new();
            let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
                Box::pin(health::run(self.clone(), cancel.clone()));
            let task = tokio::spawn(fut);
            *slot = Some(HealthHandle { cancel, task });
        })
    }

    async fn stop_health_loop(&self) {
        let handle = self.inner.health.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.task.await;
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("separator", &self.inner.settings.separator)
            .finish_non_exhaustive()
    }
}

/// Build the aggregated tool list for one server, filtering control tools
fn build_aggregated(
    server: &str,
    separator: &str,
    tools: Vec<Tool>,
) -> (Vec<AggregatedTool>, HashSet<String>) {
    let mut aggregated = Vec::with_capacity(tools.len());
    let mut control = HashSet::new();

    for tool in tools {
        let original = tool.name.to_string();
        if CONTROL_TOOLS.contains(&original.as_str()) {
            control.insert(original);
            continue;
        }

        let upstream_description = tool.description.as_deref().unwrap_or("").trim().to_owned();
        let description = if upstream_description.is_empty() {
            format!("[{server}]")
        } else {
            format!("[{server}] {upstream_description}")
        };

        aggregated.push(AggregatedTool {
            name: format!("{server}{separator}{original}"),
            original_name: original,
            server_name: server.to_owned(),
            description,
            input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
        });
    }

    (aggregated, control)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, description: &str) -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "x": { "type": "number" } }
        });
        Tool::new(
            name.to_owned(),
            description.to_owned(),
            Arc::new(schema.as_object().unwrap().clone()),
        )
    }

    #[test]
    fn aggregation_namespaces_and_prefixes() {
        let (tools, control) =
            build_aggregated("calc", ":", vec![tool("add", "Add numbers"), tool("sub", "")]);

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "calc:add");
        assert_eq!(tools[0].original_name, "add");
        assert!(tools[0].description.starts_with("[calc]"));
        assert_eq!(tools[1].description, "[calc]");
        assert!(control.is_empty());
    }

    #[test]
    fn control_tools_are_filtered() {
        let (tools, control) = build_aggregated(
            "x",
            ":",
            vec![tool("foo", "f"), tool("stats", "s"), tool("quote", "q")],
        );

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "x:foo");
        assert!(control.contains("stats"));
        assert!(control.contains("quote"));
    }

    #[test]
    fn multichar_separator_is_respected() {
        let (tools, _) = build_aggregated("srv", "-->", vec![tool("run", "r")]);
        assert_eq!(tools[0].name, "srv-->run");
    }

    #[tokio::test]
    async fn split_uses_first_separator_occurrence() {
        let manager = ConnectionManager::new(ManagerSettings::default(), None, None, None);
        assert_eq!(manager.split_tool_name("calc:add"), Some(("calc", "add")));
        assert_eq!(
            manager.split_tool_name("calc:ns:tool"),
            Some(("calc", "ns:tool"))
        );
        assert_eq!(manager.split_tool_name("plain"), None);
    }

    #[tokio::test]
    async fn unknown_server_without_repository_is_not_found() {
        let manager = ConnectionManager::new(ManagerSettings::default(), None, None, None);
        let err = manager
            .call_tool("ghost:run", None, &RequestContext::internal())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::ServerNotFound { .. }));
    }

    #[tokio::test]
    async fn disconnect_of_unknown_name_is_noop() {
        let manager = ConnectionManager::new(ManagerSettings::default(), None, None, None);
        assert!(!manager.disconnect("ghost").await);
    }
}
