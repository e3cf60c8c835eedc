use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CreditError;

/// Async HTTP client for the external user-management service
///
/// All calls carry the router's admin key; the end user's API key
/// travels in the request body.
#[derive(Clone)]
pub struct UserManagementClient {
    http: reqwest::Client,
    base_url: Url,
    admin_key: SecretString,
}

/// Body for `POST /usage/quota`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuotaRequest<'a> {
    api_key: &'a str,
    service: &'a str,
    model: Option<&'a str>,
    input_tokens: u64,
    output_tokens: u64,
}

/// Answer from `POST /usage/quota`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    #[serde(default)]
    pub remaining_daily: i64,
    #[serde(default)]
    pub remaining_monthly: i64,
}

/// Body for `POST /usage/track`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackRequest<'a> {
    api_key: &'a str,
    service: &'a str,
    model: Option<&'a str>,
    input_tokens: u64,
    output_tokens: u64,
    usage: u64,
    metadata: TrackMetadata<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackMetadata<'a> {
    tool_name: &'a str,
    duration: u64,
    success: bool,
    user_id: Option<&'a str>,
    user_email: Option<&'a str>,
    quoted_input_tokens: u64,
    quoted_output_tokens: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
}

/// Inputs to [`UserManagementClient::track_usage`]
#[derive(Debug, Clone)]
pub(crate) struct UsageReport<'a> {
    pub api_key: &'a str,
    pub service: &'a str,
    pub model: Option<&'a str>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_name: &'a str,
    pub duration_ms: u64,
    pub success: bool,
    pub user_id: Option<&'a str>,
    pub user_email: Option<&'a str>,
    pub quoted_input_tokens: u64,
    pub quoted_output_tokens: u64,
}

impl UserManagementClient {
    pub fn new(base_url: Url, admin_key: SecretString) -> Result<Self, CreditError> {
        let http = reqwest::Client::builder().build().map_err(CreditError::Request)?;
        Ok(Self {
            http,
            base_url,
            admin_key,
        })
    }

    /// Ask whether the key may spend the estimated tokens
    pub async fn check_quota(
        &self,
        api_key: &str,
        service: &str,
        model: Option<&str>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<QuotaDecision, CreditError> {
        let url = self.join("usage/quota")?;
        let body = QuotaRequest {
            api_key,
            service,
            model,
            input_tokens,
            output_tokens,
        };

        let response = self
            .http
            .post(url)
            .header("x-admin-key", self.admin_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(api_error(response).await)
        }
    }

    /// Record actual usage after a forwarded call
    pub(crate) async fn track_usage(&self, report: &UsageReport<'_>) -> Result<(), CreditError> {
        let url = self.join("usage/track")?;
        let body = TrackRequest {
            api_key: report.api_key,
            service: report.service,
            model: report.model,
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            usage: report.input_tokens + report.output_tokens,
            metadata: TrackMetadata {
                tool_name: report.tool_name,
                duration: report.duration_ms,
                success: report.success,
                user_id: report.user_id,
                user_email: report.user_email,
                quoted_input_tokens: report.quoted_input_tokens,
                quoted_output_tokens: report.quoted_output_tokens,
            },
        };

        let response = self
            .http
            .post(url)
            .header("x-admin-key", self.admin_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    /// Validate a key when no quote tool exists to price the call
    pub async fn validate_key(&self, api_key: &str) -> Result<bool, CreditError> {
        let url = self.join("keys/validate")?;
        let response = self
            .http
            .post(url)
            .header("x-admin-key", self.admin_key.expose_secret())
            .json(&ValidateRequest { api_key })
            .send()
            .await?;

        if response.status().is_success() {
            let body: ValidateResponse = response.json().await?;
            Ok(body.valid)
        } else {
            Err(api_error(response).await)
        }
    }

    fn join(&self, path: &str) -> Result<Url, CreditError> {
        self.base_url.join(path).map_err(|e| CreditError::Api {
            status: 0,
            message: format!("invalid URL: {e}"),
        })
    }
}

async fn api_error(response: reqwest::Response) -> CreditError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    CreditError::Api { status, message }
}

impl std::fmt::Debug for UserManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserManagementClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> UserManagementClient {
        UserManagementClient::new(
            Url::parse(base_url).unwrap(),
            SecretString::from("admin-key".to_owned()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn quota_check_sends_camel_case_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/usage/quota"))
            .and(header("x-admin-key", "admin-key"))
            .and(body_partial_json(serde_json::json!({
                "apiKey": "sk-user",
                "service": "calc",
                "model": "m",
                "inputTokens": 1000,
                "outputTokens": 500
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "allowed": true,
                "remainingDaily": 9000,
                "remainingMonthly": 50_000
            })))
            .mount(&server)
            .await;

        let decision = client(&format!("{}/", server.uri()))
            .check_quota("sk-user", "calc", Some("m"), 1000, 500)
            .await
            .unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining_daily, 9000);
        assert_eq!(decision.remaining_monthly, 50_000);
    }

    #[tokio::test]
    async fn quota_denial_round_trips_remaining_values() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/usage/quota"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "allowed": false,
                "remainingDaily": 0,
                "remainingMonthly": 50
            })))
            .mount(&server)
            .await;

        let decision = client(&format!("{}/", server.uri()))
            .check_quota("sk-user", "calc", None, 1000, 500)
            .await
            .unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.remaining_daily, 0);
        assert_eq!(decision.remaining_monthly, 50);
    }

    #[tokio::test]
    async fn track_includes_metadata_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/usage/track"))
            .and(body_partial_json(serde_json::json!({
                "usage": 180,
                "metadata": {
                    "toolName": "add",
                    "success": true,
                    "quotedInputTokens": 100,
                    "quotedOutputTokens": 50
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let report = UsageReport {
            api_key: "sk-user",
            service: "calc",
            model: Some("m"),
            input_tokens: 120,
            output_tokens: 60,
            tool_name: "add",
            duration_ms: 42,
            success: true,
            user_id: Some("u1"),
            user_email: None,
            quoted_input_tokens: 100,
            quoted_output_tokens: 50,
        };

        client(&format!("{}/", server.uri()))
            .track_usage(&report)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn validate_key_reads_flag() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/keys/validate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "valid": false })),
            )
            .mount(&server)
            .await;

        let valid = client(&format!("{}/", server.uri()))
            .validate_key("sk-user")
            .await
            .unwrap();
        assert!(!valid);
    }

    #[tokio::test]
    async fn server_error_surfaces_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/usage/quota"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&format!("{}/", server.uri()))
            .check_quota("sk-user", "calc", None, 1, 1)
            .await
            .unwrap_err();

        assert!(matches!(err, CreditError::Api { status: 503, .. }));
    }
}
