use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use relay_store::ServerEventType;

use crate::client::UpstreamClient;
use crate::manager::ConnectionManager;

/// Deadline for one health-check ping, independent of per-call timeouts
pub(crate) const PING_DEADLINE: Duration = Duration::from_secs(10);

/// Minimum gap between automatic reconnect attempts for one server
const RECONNECT_BACKOFF: Duration = Duration::from_secs(60);

/// Only every Nth failed reconnect is logged at warn level
const RECONNECT_LOG_EVERY: u32 = 20;

/// Health loop: runs one pass per tick until cancelled
pub(crate) async fn run(manager: ConnectionManager, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(manager.settings().ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it so a freshly
    // connected server is not pinged in the same task poll.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => pass(&manager).await,
        }
    }

    tracing::debug!("health loop stopped");
}

enum Probe {
    Reconnect { attempts: u32 },
    Ping { client: Arc<UpstreamClient> },
    Skip,
}

async fn pass(manager: &ConnectionManager) {
    let snapshot: Vec<(String, Probe)> = {
        let conns = manager.inner().connections.read().await;
        conns
            .iter()
            .map(|(name, conn)| {
                let probe = if let Some(client) = &conn.client {
                    Probe::Ping {
                        client: Arc::clone(client),
                    }
                } else if conn.config.auto_reconnect && backoff_elapsed(conn.last_reconnect_attempt)
                {
                    Probe::Reconnect {
                        attempts: conn.reconnect_attempts,
                    }
                } else {
                    Probe::Skip
                };
                (name.clone(), probe)
            })
            .collect()
    };

    for (name, probe) in snapshot {
        match probe {
            Probe::Skip => {}
            Probe::Reconnect { attempts } => try_reconnect(manager, &name, attempts).await,
            Probe::Ping { client } => check_ping(manager, &name, &client).await,
        }
    }
}

fn backoff_elapsed(last_attempt: Option<Instant>) -> bool {
    last_attempt.is_none_or(|t| t.elapsed() >= RECONNECT_BACKOFF)
}

async fn try_reconnect(manager: &ConnectionManager, name: &str, prior_attempts: u32) {
    match manager.reconnect(name).await {
        Ok(status) if status.connected => {
            tracing::info!(server = name, "health loop reconnected server");
        }
        Ok(status) => {
            // connect() already bumped the attempt counter
            if status.reconnect_attempts % RECONNECT_LOG_EVERY == 0 {
                tracing::warn!(
                    server = name,
                    attempts = status.reconnect_attempts,
                    error = status.last_error.as_deref().unwrap_or(""),
                    "server still unreachable"
                );
            } else {
                tracing::debug!(server = name, attempts = status.reconnect_attempts, "reconnect failed");
            }
        }
        Err(e) => {
            tracing::debug!(server = name, attempts = prior_attempts, error = %e, "reconnect failed");
        }
    }
}

async fn check_ping(manager: &ConnectionManager, name: &str, client: &Arc<UpstreamClient>) {
    match client.ping(PING_DEADLINE).await {
        Ok(()) => {
            let mut conns = manager.inner().connections.write().await;
            if let Some(entry) = conns.get_mut(name) {
                entry.consecutive_ping_failures = 0;
                if entry.last_error_from_ping {
                    entry.last_error = None;
                    entry.last_error_from_ping = false;
                }
            }
        }
        Err(e) => {
            let max = manager.settings().max_ping_failures;
            let (failures, disconnect_client) = {
                let mut conns = manager.inner().connections.write().await;
                let Some(entry) = conns.get_mut(name) else {
                    return;
                };
                entry.consecutive_ping_failures += 1;
                let failures = entry.consecutive_ping_failures;

                if failures >= max {
                    entry.last_error = Some(format!(
                        "disconnected after {failures} consecutive ping failures: {e}"
                    ));
                    entry.last_error_from_ping = true;
                    entry.tools.clear();
                    entry.control_tools.clear();
                    entry.last_reconnect_attempt = Some(Instant::now());
                    (failures, entry.client.take())
                } else {
                    entry.last_error = Some(format!("ping failure {failures}/{max}: {e}"));
                    entry.last_error_from_ping = true;
                    (failures, None)
                }
            };

            if let Some(old_client) = disconnect_client {
                old_client.close().await;
                tracing::warn!(
                    server = name,
                    failures,
                    "marking server disconnected after repeated ping failures"
                );
                manager.emit(
                    ServerEventType::Disconnected,
                    name,
                    Some(json!({ "consecutive_ping_failures": failures })),
                );
                manager.emit(
                    ServerEventType::HealthCheck,
                    name,
                    Some(json!({ "result": "failed", "failures": failures })),
                );

                let auto_reconnect = {
                    let conns = manager.inner().connections.read().await;
                    conns.get(name).is_some_and(|c| c.config.auto_reconnect)
                };
                if auto_reconnect && let Err(err) = manager.reconnect(name).await {
                    tracing::debug!(server = name, error = %err, "immediate reconnect failed");
                }
            } else {
                tracing::debug!(server = name, failures, "ping failed");
            }
        }
    }
}
