#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod admin;
mod auth;
mod error;
mod health;
mod mcp_endpoint;
mod request_context;
mod service;
mod state;
mod stats;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use relay_config::Config;
use relay_credit::{CreditGate, UserManagementClient};
use relay_registry::ToolRegistry;
use relay_store::{AuditBuffer, Db, EventBuffer, ServerRepository};
use relay_sync::SyncEngine;
use relay_upstream::{ConnectionManager, ManagerSettings};

pub use state::AppState;

/// Assembled router process: REST surface plus the downstream MCP
/// endpoint, with all subsystems wired
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    state: AppState,
}

impl Server {
    /// Build every subsystem from configuration
    ///
    /// # Errors
    ///
    /// Returns an error on store connection/migration failure or an
    /// unusable credit configuration
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let listen_address: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;

        // Store and its dependents
        let db = match &config.database {
            Some(database) => Some(Db::connect(database).await?),
            None => None,
        };
        let repository = db.clone().map(ServerRepository::new);
        let audit = match (&db, config.audit.enabled) {
            (Some(db), true) => Some(AuditBuffer::spawn(db.clone(), &config.audit)),
            _ => None,
        };
        let events = db.clone().map(EventBuffer::spawn);

        // Connection manager and the downstream catalog
        let manager = ConnectionManager::new(
            ManagerSettings {
                separator: config.router.separator.clone(),
                ping_interval: std::time::Duration::from_millis(config.router.ping_interval_ms),
                max_ping_failures: config.router.max_ping_failures,
            },
            repository.clone(),
            audit.clone(),
            events.clone(),
        );
        let registry = ToolRegistry::new(manager.clone());

        // Credit gate
        let credit_client = match &config.credit {
            Some(credit) => Some(UserManagementClient::new(
                credit.api_url.clone(),
                credit.api_key.clone(),
            )?),
            None => None,
        };
        let gate = CreditGate::new(manager.clone(), credit_client);

        // Multi-instance sync
        let sync = db.clone().map(|db| {
            SyncEngine::new(
                config.sync.clone(),
                db,
                manager.clone(),
                Arc::clone(&registry),
            )
        });

        let state = AppState {
            config: Arc::new(config),
            manager,
            registry,
            gate,
            sync,
            repository,
            db,
            audit,
            events,
        };

        let router = build_router(&state);

        Ok(Self {
            router,
            listen_address,
            state,
        })
    }

    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router (tests)
    pub fn into_parts(self) -> (Router, AppState) {
        (self.router, self.state)
    }

    /// Serve until the cancellation token fires, then shut down cleanly
    ///
    /// Shutdown order: stop pollers, close upstream transports in
    /// parallel, flush buffers, close the store.
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "router listening");

        let loops = CancellationToken::new();
        if let Some(sync) = &self.state.sync {
            // Converge onto the stored server set before taking traffic
            sync.reconcile_once().await;
            sync.spawn(loops.clone());
        }
        self.spawn_retention_loop(&loops);

        let state = self.state.clone();
        let serve_shutdown = shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                serve_shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        loops.cancel();
        state.manager.disconnect_all().await;
        if let Some(audit) = &state.audit {
            audit.shutdown().await;
        }
        if let Some(events) = &state.events {
            events.shutdown().await;
        }
        if let Some(db) = &state.db {
            db.close().await;
        }

        tracing::info!("router stopped");
        Ok(())
    }

    /// Hourly hard-deletion of aged audit rows and soft-deleted servers
    fn spawn_retention_loop(&self, cancel: &CancellationToken) {
        let (Some(db), Some(repo)) = (self.state.db.clone(), self.state.repository.clone()) else {
            return;
        };
        let days = self.state.config.audit.retention_days;
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = db.cleanup_tool_calls(days).await {
                            tracing::warn!(error = %e, "audit retention cleanup failed");
                        }
                        if let Err(e) = repo.cleanup_deleted(days).await {
                            tracing::warn!(error = %e, "deleted-server cleanup failed");
                        }
                    }
                }
            }
        });
    }
}

fn build_router(state: &AppState) -> Router {
    let mut app = Router::new()
        .route("/register", post(admin::register_handler))
        .route("/register/{server_name}", delete(admin::unregister_handler))
        .route("/health", get(health::health_handler))
        .route("/config", get(health::config_handler))
        .route("/stats", get(stats::stats_handler).layer(stats::permissive_cors()))
        .with_state(state.clone());

    // Downstream MCP endpoint (POST only; everything else is 405)
    app = app.merge(mcp_endpoint::mcp_routes(state));

    // Request context runs innermost, right before handlers
    app = app.layer(axum::middleware::from_fn(
        request_context::request_context_middleware,
    ));

    app = app.layer(TraceLayer::new_for_http());

    if let Some(cors) = &state.config.server.cors {
        app = app.layer(crate::stats::cors_layer(cors));
    }

    if state.config.server.auth.enabled
        && let Some(token) = &state.config.server.auth.token
    {
        let expected = token.expose_secret().to_owned();
        let public_paths = state.config.server.auth.public_paths.clone();
        app = app.layer(axum::middleware::from_fn(move |req, next| {
            let expected = expected.clone();
            let public_paths = public_paths.clone();
            async move { auth::auth_middleware(expected, public_paths, req, next).await }
        }));
    }

    app
}
