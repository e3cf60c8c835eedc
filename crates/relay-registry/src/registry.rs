use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, Tool};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use relay_core::RequestContext;
use relay_upstream::{AggregatedTool, ConnectionManager, UpstreamError};

use crate::shape::SchemaShape;

/// Dispatch closure behind one registered tool name
///
/// Handlers are swapped through the indirection map; the registration
/// itself never holds more than this pointer.
pub type ToolHandler = Arc<
    dyn Fn(
            Option<Map<String, Value>>,
            RequestContext,
        ) -> BoxFuture<'static, Result<CallToolResult, UpstreamError>>
        + Send
        + Sync,
>;

/// What one `register_tools_for` pass did
#[derive(Debug, Default, Clone)]
pub struct RegisterSummary {
    /// Newly registered names
    pub added: Vec<String>,
    /// Handler swapped in place, schema unchanged, no catalog change
    pub updated: Vec<String>,
    /// Schema changed: old registration removed, new one installed
    pub replaced: Vec<String>,
}

struct Registered {
    tool: AggregatedTool,
    shape: SchemaShape,
    canonical: String,
    /// Stable per-registration handle; preserved across handler-only
    /// updates, replaced on schema change
    handle: u64,
}

/// Downstream-facing catalog of namespaced tools
///
/// Owns the name-to-registration and name-to-handler maps. The catalog
/// revision bumps only on visible changes (add, remove, schema change);
/// handler-only updates leave it untouched, which is what keeps
/// `listChanged` quiet for invisible updates.
pub struct ToolRegistry {
    manager: ConnectionManager,
    registered: RwLock<HashMap<String, Registered>>,
    handlers: RwLock<HashMap<String, ToolHandler>>,
    revision: AtomicU64,
    next_handle: AtomicU64,
}

impl ToolRegistry {
    pub fn new(manager: ConnectionManager) -> Arc<Self> {
        Arc::new(Self {
            manager,
            registered: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Current catalog revision; changes exactly when the visible
    /// catalog does
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Pull the server's aggregated tools and sync them into the catalog
    pub async fn register_tools_for(&self, server: &str) -> Result<RegisterSummary, UpstreamError> {
        let tools = self
            .manager
            .tools_for(server)
            .await
            .ok_or_else(|| UpstreamError::ServerNotFound {
                server: server.to_owned(),
            })?;

        let summary = self.apply_tools(tools).await;
        tracing::info!(
            server,
            added = summary.added.len(),
            updated = summary.updated.len(),
            replaced = summary.replaced.len(),
            "registered tools"
        );
        Ok(summary)
    }

    /// Remove every registration whose name is under this server's
    /// namespace; returns the removed names
    pub async fn unregister_tools_for(&self, server: &str) -> Vec<String> {
        let prefix = format!("{server}{}", self.manager.separator());

        let mut registered = self.registered.write().await;
        let mut handlers = self.handlers.write().await;

        let mut removed: Vec<String> = registered
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();
        removed.sort();

        for name in &removed {
            registered.remove(name);
            handlers.remove(name);
        }
        drop(handlers);
        drop(registered);

        if !removed.is_empty() {
            self.revision.fetch_add(1, Ordering::AcqRel);
            tracing::info!(server, count = removed.len(), "unregistered tools");
        }
        removed
    }

    /// The advertised catalog as rmcp tools, name-ordered
    pub async fn list_tools(&self) -> Vec<Tool> {
        let registered = self.registered.read().await;
        let mut entries: Vec<&Registered> = registered.values().collect();
        entries.sort_by(|a, b| a.tool.name.cmp(&b.tool.name));

        entries
            .iter()
            .map(|entry| {
                let schema = entry
                    .shape
                    .to_schema()
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                Tool::new(
                    entry.tool.name.clone(),
                    entry.tool.description.clone(),
                    Arc::new(schema),
                )
            })
            .collect()
    }

    /// Resolve the current handler and input shape for one name
    pub async fn lookup(&self, name: &str) -> Option<(ToolHandler, SchemaShape)> {
        let shape = {
            let registered = self.registered.read().await;
            registered.get(name)?.shape.clone()
        };
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(name)?.clone()
        };
        Some((handler, shape))
    }

    /// Registered names, for listings and diagnostics
    pub async fn tool_names(&self) -> Vec<String> {
        let registered = self.registered.read().await;
        let mut names: Vec<String> = registered.keys().cloned().collect();
        names.sort();
        names
    }

    async fn apply_tools(&self, tools: Vec<AggregatedTool>) -> RegisterSummary {
        let mut summary = RegisterSummary::default();

        let mut registered = self.registered.write().await;
        let mut handlers = self.handlers.write().await;
        let mut catalog_changed = false;

        for tool in tools {
            let shape = SchemaShape::convert(&tool.input_schema);
            let canonical = shape.canonical();
            let handler = forward_handler(self.manager.clone(), tool.name.clone());
            let name = tool.name.clone();

            let existing_canonical = registered.get(&name).map(|r| r.canonical.clone());
            match existing_canonical {
                None => {
                    registered.insert(
                        name.clone(),
                        Registered {
                            tool,
                            shape,
                            canonical,
                            handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
                        },
                    );
                    handlers.insert(name.clone(), handler);
                    catalog_changed = true;
                    summary.added.push(name);
                }
                Some(current) if current == canonical => {
                    // Invisible update: swap the indirection target only
                    if let Some(existing) = registered.get_mut(&name) {
                        existing.tool = tool;
                    }
                    handlers.insert(name.clone(), handler);
                    summary.updated.push(name);
                }
                Some(_) => {
                    // Schema changed: replace the registration outright
                    registered.insert(
                        name.clone(),
                        Registered {
                            tool,
                            shape,
                            canonical,
                            handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
                        },
                    );
                    handlers.insert(name.clone(), handler);
                    catalog_changed = true;
                    summary.replaced.push(name);
                }
            }
        }

        drop(handlers);
        drop(registered);

        if catalog_changed {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        summary
    }

    #[cfg(test)]
    async fn handle_of(&self, name: &str) -> Option<u64> {
        let registered = self.registered.read().await;
        registered.get(name).map(|r| r.handle)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

/// Build the stable dispatch closure that forwards through the manager
fn forward_handler(manager: ConnectionManager, namespaced: String) -> ToolHandler {
    Arc::new(move |arguments, ctx| {
        let manager = manager.clone();
        let name = namespaced.clone();
        async move { manager.call_tool(&name, arguments, &ctx).await }.boxed()
    })
}
