#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod client;
mod error;
mod gate;
mod usage;

pub use client::{QuotaDecision, UserManagementClient};
pub use error::CreditError;
pub use gate::CreditGate;
pub use usage::{CostEstimate, extract_actuals, parse_quote};
