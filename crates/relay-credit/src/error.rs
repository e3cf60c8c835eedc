use thiserror::Error;

/// Errors from the credit-gated invocation path
#[derive(Debug, Error)]
pub enum CreditError {
    /// API key failed validation
    #[error("invalid API key")]
    InvalidApiKey,

    /// Quota check returned `allowed = false`
    #[error("insufficient credits: {remaining_daily} daily / {remaining_monthly} monthly remaining")]
    InsufficientCredits {
        remaining_daily: i64,
        remaining_monthly: i64,
    },

    /// The upstream quote tool failed or returned an unusable body
    #[error("quote failed: {0}")]
    QuoteFailed(String),

    /// The user-management service could not be reached or errored
    #[error("user management request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The user-management service returned a non-success status
    #[error("user management API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Error from the forwarded upstream call
    #[error(transparent)]
    Upstream(#[from] relay_upstream::UpstreamError),
}

impl CreditError {
    /// Machine-readable code for MCP error content
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidApiKey => "invalid_api_key",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::QuoteFailed(_) => "quote_failed",
            Self::Request(_) | Self::Api { .. } => "credit_check_failed",
            Self::Upstream(e) => {
                use relay_core::HttpError as _;
                e.error_type()
            }
        }
    }
}
