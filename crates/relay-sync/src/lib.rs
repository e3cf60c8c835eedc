#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod apply;
mod engine;

pub use engine::SyncEngine;
