#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod context;
mod error;

pub use context::{CallerIdentity, RequestContext};
pub use error::HttpError;
