use http::StatusCode;
use relay_core::HttpError;
use thiserror::Error;

/// Errors from the upstream connection layer
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Requested server is neither connected nor in the repository
    #[error("server not found: {server}")]
    ServerNotFound { server: String },

    /// Server is known but not connected, and one reconnect attempt failed
    #[error("server disconnected: {server}")]
    ServerDisconnected { server: String },

    /// Namespaced tool name did not resolve to a known tool
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// Transport-level connection or handshake failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Error surfaced by the upstream MCP call
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Upstream call exceeded its deadline
    #[error("call to {server} timed out after {ms}ms")]
    Timeout { server: String, ms: u64 },

    /// Repository failure on the lazy-connect path
    #[error(transparent)]
    Store(#[from] relay_store::StoreError),
}

impl HttpError for UpstreamError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ServerNotFound { .. } | Self::ToolNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ServerDisconnected { .. } | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::ServerNotFound { .. } => "server_not_found",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ServerDisconnected { .. } => "server_disconnected",
            Self::Transport(_) | Self::Timeout { .. } => "upstream_error",
            Self::Upstream(_) => "upstream_error",
            Self::Store(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Store(_) => "internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}
