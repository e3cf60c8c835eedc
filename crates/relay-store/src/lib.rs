#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod analytics;
mod buffers;
mod db;
mod error;
mod servers;
mod sync_events;
mod types;

pub use analytics::{ToolCallTotals, ToolUsage};
pub use buffers::{AuditBuffer, EventBuffer};
pub use db::{Db, StoreHealth};
pub use error::StoreError;
pub use servers::ServerRepository;
pub use sync_events::SyncEventStore;
pub use types::{
    CallStatus, NewServer, ServerEventRecord, ServerEventType, ServerRecord, SyncEvent,
    SyncEventType, ToolCallRecord,
};
