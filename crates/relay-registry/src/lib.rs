#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod postprocess;
mod registry;
mod shape;

pub use postprocess::strip_internal_metrics;
pub use registry::{RegisterSummary, ToolHandler, ToolRegistry};
pub use shape::SchemaShape;
