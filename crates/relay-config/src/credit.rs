use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Credit gating configuration
///
/// Points at the external user-management service used for quota checks
/// and usage tracking. When this section is absent the gate forwards
/// every call untouched.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreditConfig {
    /// Base URL of the user-management API
    pub api_url: Url,
    /// Admin key authorizing quota and tracking calls
    pub api_key: SecretString,
}
