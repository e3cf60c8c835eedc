use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use relay_config::SyncConfig;
use relay_registry::ToolRegistry;
use relay_store::{Db, ServerRepository, SyncEvent, SyncEventStore, SyncEventType};
use relay_upstream::ConnectionManager;

use crate::apply::{SyncAction, decide, payload_config, payload_server_name};

/// Maximum events consumed per poll tick
const POLL_BATCH: i64 = 100;

/// Converges this instance with its peers through the shared store
///
/// The event log is the fast path; the periodic reconciliation scan is
/// the correctness backstop. Publication and consumption share nothing
/// but the store, so they never serialize each other.
#[derive(Clone)]
pub struct SyncEngine {
    instance_id: Arc<str>,
    events: SyncEventStore,
    repository: ServerRepository,
    manager: ConnectionManager,
    registry: Arc<ToolRegistry>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        db: Db,
        manager: ConnectionManager,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let instance_id: Arc<str> = config
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
            .into();

        tracing::info!(instance_id = %instance_id, "sync engine identity assigned");

        Self {
            instance_id,
            events: SyncEventStore::new(db.clone()),
            repository: ServerRepository::new(db),
            manager,
            registry,
            config,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Publish one event after a successful local operation
    ///
    /// Store errors are logged; the local operation already succeeded
    /// and must not be rolled back by an unreachable log.
    pub async fn publish(&self, event_type: SyncEventType, event_data: Value) {
        if !self.config.enabled {
            return;
        }
        if let Err(e) = self
            .events
            .append(event_type, &event_data, &self.instance_id)
            .await
        {
            tracing::warn!(event_type = event_type.as_str(), error = %e, "failed to publish sync event");
        }
    }

    /// Spawn the poll, reconcile, and cleanup loops
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(Duration::from_millis(
                engine.config.poll_interval_ms.max(1),
            ));
            let mut reconcile = tokio::time::interval(Duration::from_millis(
                engine.config.reconcile_interval_ms.max(1),
            ));
            let mut cleanup = tokio::time::interval(Duration::from_millis(
                engine.config.cleanup_interval_ms.max(1),
            ));
            for ticker in [&mut poll, &mut reconcile, &mut cleanup] {
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // Swallow the immediate first tick
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = poll.tick() => {
                        if engine.config.enabled {
                            engine.poll_once().await;
                        }
                    }
                    _ = reconcile.tick() => engine.reconcile_once().await,
                    _ = cleanup.tick() => engine.cleanup_once().await,
                }
            }

            tracing::debug!("sync engine stopped");
        })
    }

    /// Consume one batch of unacknowledged events, oldest first
    pub async fn poll_once(&self) {
        let events = match self.events.fetch_unprocessed(&self.instance_id, POLL_BATCH).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "sync poll failed");
                return;
            }
        };

        for event in events {
            let own = event.instance_id == *self.instance_id;
            if !own {
                self.dispatch(&event).await;
            }
            if let Err(e) = self.events.acknowledge(event.id, &self.instance_id).await {
                tracing::warn!(event_id = %event.id, error = %e, "failed to acknowledge sync event");
            }
        }
    }

    async fn dispatch(&self, event: &SyncEvent) {
        let Some(name) = payload_server_name(&event.event_data) else {
            tracing::warn!(event_id = %event.id, "sync event payload has no server name");
            return;
        };

        let tracked = self.manager.is_tracked(&name).await;
        let connected = self.manager.is_connected(&name).await;
        let action = decide(event.event_type, false, tracked, connected);

        tracing::debug!(
            event_type = event.event_type.as_str(),
            server = %name,
            ?action,
            publisher = %event.instance_id,
            "applying sync event"
        );

        match action {
            SyncAction::Ignore => {}
            SyncAction::Connect => {
                let config = match payload_config(&event.event_data) {
                    Some(config) => Some(config),
                    // Old or thin payload: fall back to the repository
                    None => match self.repository.find_by_name(&name).await {
                        Ok(record) => record.as_ref().map(Into::into),
                        Err(e) => {
                            tracing::warn!(server = %name, error = %e, "repository lookup failed");
                            None
                        }
                    },
                };
                let Some(config) = config else {
                    tracing::warn!(server = %name, "no usable config for sync connect");
                    return;
                };
                if !config.enabled {
                    return;
                }
                let status = self.manager.connect(config).await;
                if status.connected
                    && let Err(e) = self.registry.register_tools_for(&name).await
                {
                    tracing::warn!(server = %name, error = %e, "tool registration after sync connect failed");
                }
            }
            SyncAction::Reconnect => {
                match self.manager.reconnect(&name).await {
                    Ok(status) if status.connected => {
                        if let Err(e) = self.registry.register_tools_for(&name).await {
                            tracing::warn!(server = %name, error = %e, "tool registration after sync reconnect failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(server = %name, error = %e, "sync reconnect failed"),
                }
            }
            SyncAction::Unregister => {
                self.registry.unregister_tools_for(&name).await;
                self.manager.disconnect(&name).await;
            }
            SyncAction::Disconnect => {
                self.manager.disconnect(&name).await;
            }
        }
    }

    /// Scan the repository and converge local state onto it
    pub async fn reconcile_once(&self) {
        let records = match self.repository.find_all(false).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "reconciliation scan failed");
                return;
            }
        };

        for record in records {
            let name = record.name.clone();

            if !self.manager.is_tracked(&name).await {
                tracing::info!(server = %name, "reconciliation connecting stored server");
                let status = self.manager.connect((&record).into()).await;
                if status.connected
                    && let Err(e) = self.registry.register_tools_for(&name).await
                {
                    tracing::warn!(server = %name, error = %e, "tool registration after reconcile failed");
                }
            } else if !self.manager.is_connected(&name).await {
                match self.manager.reconnect(&name).await {
                    Ok(status) if status.connected => {
                        if let Err(e) = self.registry.register_tools_for(&name).await {
                            tracing::warn!(server = %name, error = %e, "tool registration after reconcile failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(server = %name, error = %e, "reconcile reconnect failed"),
                }
            }
        }
    }

    /// Drop events older than the retention window
    pub async fn cleanup_once(&self) {
        match self
            .events
            .delete_older_than(self.config.event_retention_hours)
            .await
        {
            Ok(0) => {}
            Ok(deleted) => tracing::info!(deleted, "cleaned up aged sync events"),
            Err(e) => tracing::warn!(error = %e, "sync event cleanup failed"),
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}
