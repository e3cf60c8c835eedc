use rmcp::model::{CallToolResult, RawContent};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CreditError;

/// Cost estimate returned by an upstream `quote` tool
#[derive(Debug, Clone, Deserialize)]
pub struct CostEstimate {
    #[serde(default)]
    pub model_id: Option<String>,
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    #[serde(default)]
    success: bool,
    estimated_cost: Option<CostEstimate>,
}

/// Parse the result of a `quote` call into a [`CostEstimate`]
pub fn parse_quote(result: &CallToolResult) -> Result<CostEstimate, CreditError> {
    if result.is_error == Some(true) {
        return Err(CreditError::QuoteFailed(
            "quote tool returned an error".to_owned(),
        ));
    }

    let text = first_text(result)
        .ok_or_else(|| CreditError::QuoteFailed("quote returned no text content".to_owned()))?;

    let body: QuoteBody = serde_json::from_str(text)
        .map_err(|e| CreditError::QuoteFailed(format!("unparsable quote body: {e}")))?;

    if !body.success {
        return Err(CreditError::QuoteFailed(
            "quote reported success=false".to_owned(),
        ));
    }

    body.estimated_cost
        .ok_or_else(|| CreditError::QuoteFailed("quote body missing estimated_cost".to_owned()))
}

/// Extract actual token usage from a forwarded tool response
///
/// Looks for `models_metrics` / `modelsMetrics` at the top level of the
/// JSON text payload and sums `input_tokens` / `output_tokens` across
/// every listed model. Returns `None` when no metrics are present, in
/// which case the quote values stand as actuals.
pub fn extract_actuals(result: &CallToolResult) -> Option<(u64, u64)> {
    let text = first_text(result)?;
    let payload: Value = serde_json::from_str(text).ok()?;

    let metrics = payload
        .get("models_metrics")
        .or_else(|| payload.get("modelsMetrics"))?;

    let entries: Vec<&Value> = match metrics {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => return None,
    };

    let mut input = 0u64;
    let mut output = 0u64;
    for entry in entries {
        input += entry.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        output += entry.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    }

    Some((input, output))
}

fn first_text(result: &CallToolResult) -> Option<&str> {
    result.content.first().and_then(|c| match &c.raw {
        RawContent::Text(t) => Some(t.text.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;

    fn text_result(payload: Value) -> CallToolResult {
        CallToolResult::success(vec![Content::text(payload.to_string())])
    }

    #[test]
    fn parses_full_quote() {
        let result = text_result(json!({
            "success": true,
            "estimated_cost": { "model_id": "m", "input_tokens": 1000, "output_tokens": 500 }
        }));

        let estimate = parse_quote(&result).unwrap();
        assert_eq!(estimate.model_id.as_deref(), Some("m"));
        assert_eq!(estimate.input_tokens, 1000);
        assert_eq!(estimate.output_tokens, 500);
    }

    #[test]
    fn quote_output_tokens_default_to_zero() {
        let result = text_result(json!({
            "success": true,
            "estimated_cost": { "input_tokens": 10 }
        }));

        let estimate = parse_quote(&result).unwrap();
        assert_eq!(estimate.output_tokens, 0);
    }

    #[test]
    fn unsuccessful_quote_is_rejected() {
        let result = text_result(json!({ "success": false }));
        assert!(matches!(
            parse_quote(&result),
            Err(CreditError::QuoteFailed(_))
        ));
    }

    #[test]
    fn error_quote_is_rejected() {
        let result = CallToolResult::error(vec![Content::text("boom")]);
        assert!(parse_quote(&result).is_err());
    }

    #[test]
    fn actuals_sum_across_array_of_models() {
        let result = text_result(json!({
            "answer": "...",
            "models_metrics": [
                { "model": "a", "input_tokens": 100, "output_tokens": 20 },
                { "model": "b", "input_tokens": 50, "output_tokens": 5 }
            ]
        }));

        assert_eq!(extract_actuals(&result), Some((150, 25)));
    }

    #[test]
    fn actuals_sum_across_model_map() {
        let result = text_result(json!({
            "modelsMetrics": {
                "a": { "input_tokens": 7, "output_tokens": 3 },
                "b": { "input_tokens": 1 }
            }
        }));

        assert_eq!(extract_actuals(&result), Some((8, 3)));
    }

    #[test]
    fn missing_metrics_yield_none() {
        let result = text_result(json!({ "answer": 42 }));
        assert_eq!(extract_actuals(&result), None);
    }

    #[test]
    fn non_json_text_yields_none() {
        let result = CallToolResult::success(vec![Content::text("not json")]);
        assert_eq!(extract_actuals(&result), None);
    }
}
