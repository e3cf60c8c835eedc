use std::time::Instant;

use rmcp::model::CallToolResult;
use secrecy::ExposeSecret;
use serde_json::json;

use relay_core::RequestContext;
use relay_registry::{ToolHandler, strip_internal_metrics};
use relay_upstream::ConnectionManager;

use crate::client::{UsageReport, UserManagementClient};
use crate::error::CreditError;
use crate::usage::{extract_actuals, parse_quote};

/// How a given call moves through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateMode {
    /// Forward directly; no pricing, no tracking
    Bypass,
    /// Validate the API key, then forward without pricing or tracking
    ValidateOnly,
    /// Quote, quota-check, forward, extract actuals, track
    Full,
}

fn classify(original_tool: &str, has_api_key: bool, has_client: bool, has_quote_tool: bool) -> GateMode {
    if original_tool == "quote" || !has_api_key || !has_client {
        return GateMode::Bypass;
    }
    if !has_quote_tool {
        return GateMode::ValidateOnly;
    }
    GateMode::Full
}

/// Credit-gated invocation path
///
/// Every forwarded client tool call enters here. The connection
/// manager does the forwarding (and the auditing); this type decides
/// whether and how the call is priced.
#[derive(Debug, Clone)]
pub struct CreditGate {
    manager: ConnectionManager,
    client: Option<UserManagementClient>,
}

impl CreditGate {
    pub fn new(manager: ConnectionManager, client: Option<UserManagementClient>) -> Self {
        Self { manager, client }
    }

    /// Invoke `{server}{sep}{original}` under the bypass matrix
    ///
    /// `forward` is the registry's current dispatch closure for the
    /// namespaced tool; the gate never reaches around the handler
    /// indirection. On success the response has internal metrics keys
    /// stripped.
    pub async fn invoke(
        &self,
        server: &str,
        original: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ctx: &RequestContext,
        forward: &ToolHandler,
    ) -> Result<CallToolResult, CreditError> {
        let mode = classify(
            original,
            ctx.caller.api_key.is_some(),
            self.client.is_some(),
            self.manager.has_quote_tool(server).await,
        );

        match mode {
            GateMode::Bypass => self.forward(forward, arguments, ctx).await,
            GateMode::ValidateOnly => {
                let client = self.client.as_ref().expect("client present in ValidateOnly");
                let api_key = ctx.caller.api_key.as_ref().expect("key present in ValidateOnly");
                if !client.validate_key(api_key.expose_secret()).await? {
                    return Err(CreditError::InvalidApiKey);
                }
                self.forward(forward, arguments, ctx).await
            }
            GateMode::Full => {
                self.invoke_priced(server, original, arguments, ctx, forward)
                    .await
            }
        }
    }

    async fn invoke_priced(
        &self,
        server: &str,
        original: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ctx: &RequestContext,
        forward: &ToolHandler,
    ) -> Result<CallToolResult, CreditError> {
        let client = self.client.as_ref().expect("client present in Full");
        let api_key = ctx.caller.api_key.as_ref().expect("key present in Full");

        // 1. Pre-price the call through the upstream's quote tool
        let quote_args = json!({
            "tool_name": original,
            "tool_args": arguments.clone().map(serde_json::Value::Object).unwrap_or(json!({})),
        });
        let quote_result = self
            .manager
            .call_quote_tool(server, quote_args.as_object().cloned().unwrap_or_default())
            .await?;
        let estimate = parse_quote(&quote_result)?;

        // 2. Quota check against the user-management service
        let decision = client
            .check_quota(
                api_key.expose_secret(),
                server,
                estimate.model_id.as_deref(),
                estimate.input_tokens,
                estimate.output_tokens,
            )
            .await?;
        if !decision.allowed {
            return Err(CreditError::InsufficientCredits {
                remaining_daily: decision.remaining_daily,
                remaining_monthly: decision.remaining_monthly,
            });
        }

        // 3. Forward, measuring wall time
        let started = Instant::now();
        let mut result = (**forward)(arguments, ctx.clone()).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        // 4. Actuals supersede the quote when the response carries them
        let (input_tokens, output_tokens) =
            extract_actuals(&result).unwrap_or((estimate.input_tokens, estimate.output_tokens));

        // 5. Track; failures are logged, never surfaced
        let report = UsageReport {
            api_key: api_key.expose_secret(),
            service: server,
            model: estimate.model_id.as_deref(),
            input_tokens,
            output_tokens,
            tool_name: original,
            duration_ms,
            success: result.is_error != Some(true),
            user_id: ctx.caller.user_id.as_deref(),
            user_email: ctx.caller.user_email.as_deref(),
            quoted_input_tokens: estimate.input_tokens,
            quoted_output_tokens: estimate.output_tokens,
        };
        if let Err(e) = client.track_usage(&report).await {
            tracing::warn!(server, tool = original, error = %e, "usage tracking failed");
        }

        // 6. Internal metrics must not leak downstream
        strip_internal_metrics(&mut result);
        Ok(result)
    }

    async fn forward(
        &self,
        forward: &ToolHandler,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ctx: &RequestContext,
    ) -> Result<CallToolResult, CreditError> {
        let mut result = (**forward)(arguments, ctx.clone()).await?;
        strip_internal_metrics(&mut result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_tool_always_bypasses() {
        assert_eq!(classify("quote", true, true, true), GateMode::Bypass);
        assert_eq!(classify("quote", false, false, false), GateMode::Bypass);
    }

    #[test]
    fn missing_api_key_bypasses() {
        assert_eq!(classify("add", false, true, true), GateMode::Bypass);
    }

    #[test]
    fn uninitialized_credit_manager_bypasses() {
        assert_eq!(classify("add", true, false, true), GateMode::Bypass);
    }

    #[test]
    fn key_without_quote_tool_validates_only() {
        assert_eq!(classify("add", true, true, false), GateMode::ValidateOnly);
    }

    #[test]
    fn key_with_quote_tool_runs_full_pipeline() {
        assert_eq!(classify("add", true, true, true), GateMode::Full);
    }
}
