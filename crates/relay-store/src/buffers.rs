use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use relay_config::AuditConfig;

use crate::db::Db;
use crate::error::StoreError;
use crate::types::{ServerEventRecord, ToolCallRecord};

/// Messages understood by a buffer's flush task
enum Msg<T> {
    Row(T),
    Flush(oneshot::Sender<()>),
}

const EVENT_BATCH: usize = 10;
const EVENT_INTERVAL: Duration = Duration::from_secs(5);
const AUDIT_BATCH: usize = 20;
const AUDIT_INTERVAL: Duration = Duration::from_secs(10);

/// Channel depth; enqueue is lossy once the flusher falls this far behind
const QUEUE_DEPTH: usize = 10_000;

/// Buffered writer for server lifecycle events
///
/// Enqueue per call; the background task flushes on batch size, on a
/// timer, and on shutdown. A failed flush drops its batch — the event
/// trail is observability, not correctness.
#[derive(Clone)]
pub struct EventBuffer {
    tx: mpsc::Sender<Msg<ServerEventRecord>>,
}

impl EventBuffer {
    /// Spawn the flush task and return the enqueue handle
    pub fn spawn(db: Db) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run_event_flusher(db, rx));
        Self { tx }
    }

    /// Non-blocking enqueue; drops the row if the queue is full
    pub fn record(&self, event: ServerEventRecord) {
        if self.tx.try_send(Msg::Row(event)).is_err() {
            tracing::warn!("event buffer full, dropping server event");
        }
    }

    /// Best-effort flush of everything enqueued so far
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Msg::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer").finish_non_exhaustive()
    }
}

async fn run_event_flusher(db: Db, mut rx: mpsc::Receiver<Msg<ServerEventRecord>>) {
    let mut buffer: Vec<ServerEventRecord> = Vec::new();
    let mut ticker = tokio::time::interval(EVENT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Msg::Row(row)) => {
                    buffer.push(row);
                    if buffer.len() >= EVENT_BATCH {
                        flush_events(&db, std::mem::take(&mut buffer)).await;
                    }
                }
                Some(Msg::Flush(ack)) => {
                    flush_events(&db, std::mem::take(&mut buffer)).await;
                    let _ = ack.send(());
                }
                None => {
                    flush_events(&db, std::mem::take(&mut buffer)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_events(&db, std::mem::take(&mut buffer)).await;
                }
            }
        }
    }

    tracing::debug!("event buffer shutting down");
}

async fn flush_events(db: &Db, rows: Vec<ServerEventRecord>) {
    if rows.is_empty() {
        return;
    }
    let count = rows.len();
    if let Err(e) = write_events(db, &rows).await {
        tracing::warn!(error = %e, count, "server event flush failed, batch dropped");
    }
}

async fn write_events(db: &Db, rows: &[ServerEventRecord]) -> Result<(), StoreError> {
    let mut tx = db.pool().begin().await?;
    for row in rows {
        sqlx::query(
            r"
            INSERT INTO server_events (server_id, server_name, event_type, details)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(row.server_id)
        .bind(&row.server_name)
        .bind(row.event_type.as_str())
        .bind(&row.details)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Buffered writer for the tool-call audit trail
///
/// Same buffering contract as [`EventBuffer`] with its own thresholds.
/// Honors the `log_arguments` / `log_responses` sanitization flags
/// before enqueue so raw payloads never sit in the queue.
#[derive(Clone)]
pub struct AuditBuffer {
    tx: mpsc::Sender<Msg<ToolCallRecord>>,
    log_arguments: bool,
    log_responses: bool,
}

impl AuditBuffer {
    /// Spawn the flush task and return the enqueue handle
    pub fn spawn(db: Db, config: &AuditConfig) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run_audit_flusher(db, rx));
        Self {
            tx,
            log_arguments: config.log_arguments,
            log_responses: config.log_responses,
        }
    }

    /// Sanitize and enqueue one audit row
    pub fn record(&self, mut row: ToolCallRecord) {
        if !self.log_arguments {
            row.arguments = None;
        }
        if !self.log_responses {
            row.response = None;
        }
        if self.tx.try_send(Msg::Row(row)).is_err() {
            tracing::warn!("audit buffer full, dropping tool call record");
        }
    }

    /// Best-effort flush of everything enqueued so far
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Msg::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

impl std::fmt::Debug for AuditBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditBuffer")
            .field("log_arguments", &self.log_arguments)
            .field("log_responses", &self.log_responses)
            .finish_non_exhaustive()
    }
}

async fn run_audit_flusher(db: Db, mut rx: mpsc::Receiver<Msg<ToolCallRecord>>) {
    let mut buffer: Vec<ToolCallRecord> = Vec::new();
    let mut ticker = tokio::time::interval(AUDIT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Msg::Row(row)) => {
                    buffer.push(row);
                    if buffer.len() >= AUDIT_BATCH {
                        flush_audit(&db, std::mem::take(&mut buffer)).await;
                    }
                }
                Some(Msg::Flush(ack)) => {
                    flush_audit(&db, std::mem::take(&mut buffer)).await;
                    let _ = ack.send(());
                }
                None => {
                    flush_audit(&db, std::mem::take(&mut buffer)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_audit(&db, std::mem::take(&mut buffer)).await;
                }
            }
        }
    }

    tracing::debug!("audit buffer shutting down");
}

async fn flush_audit(db: &Db, rows: Vec<ToolCallRecord>) {
    if rows.is_empty() {
        return;
    }
    let count = rows.len();
    if let Err(e) = write_audit(db, &rows).await {
        tracing::warn!(error = %e, count, "audit flush failed, batch dropped");
    }
}

async fn write_audit(db: &Db, rows: &[ToolCallRecord]) -> Result<(), StoreError> {
    let mut tx = db.pool().begin().await?;
    for row in rows {
        sqlx::query(
            r"
            INSERT INTO tool_calls
                (server_name, tool_name, arguments, response, duration_ms, status,
                 error_message, user_id, user_email, api_key_prefix)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&row.server_name)
        .bind(&row.tool_name)
        .bind(&row.arguments)
        .bind(&row.response)
        .bind(row.duration_ms)
        .bind(row.status.as_str())
        .bind(&row.error_message)
        .bind(&row.user_id)
        .bind(&row.user_email)
        .bind(&row.api_key_prefix)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
