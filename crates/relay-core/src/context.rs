use secrecy::SecretString;
use uuid::Uuid;

/// Identity of the caller behind one client request
///
/// Populated by the server's request-context middleware from the
/// `Authorization` / `x-api-key` / `x-user-id` / `x-user-email` headers.
/// Everything is optional: anonymous calls are legal and simply bypass
/// credit gating and user attribution in the audit trail.
#[derive(Debug, Clone, Default)]
pub struct CallerIdentity {
    /// API key presented by the client, if any
    pub api_key: Option<SecretString>,
    /// Upstream user id, if the deployment propagates one
    pub user_id: Option<String>,
    /// Upstream user email, if the deployment propagates one
    pub user_email: Option<String>,
}

/// Runtime context scoped to one client request
///
/// Carried as an axum extension so inner components (credit gate, audit
/// buffer) receive caller identity without threading it through every
/// signature.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique id for correlating log lines and audit rows
    pub request_id: Uuid,
    /// Caller identity extracted from request headers
    pub caller: CallerIdentity,
}

impl RequestContext {
    /// Create a context with a fresh request id and the given identity
    pub fn new(caller: CallerIdentity) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            caller,
        }
    }

    /// Context for internal (non-client) work such as health checks
    pub fn internal() -> Self {
        Self::new(CallerIdentity::default())
    }

    /// First eight characters of the API key, for audit rows
    ///
    /// Never exposes the full key.
    pub fn api_key_prefix(&self) -> Option<String> {
        use secrecy::ExposeSecret;
        self.caller
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().chars().take(8).collect())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::internal()
    }
}
