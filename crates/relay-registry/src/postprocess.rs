use rmcp::model::{CallToolResult, RawContent};
use serde_json::Value;

/// Internal cost-accounting keys that must never reach downstream clients
const METRIC_KEYS: [&str; 2] = ["models_metrics", "modelsMetrics"];

/// Strip internal metrics keys from a successful tool result
///
/// Applies to the top level of a JSON text payload in `content[0]` and
/// to `structuredContent.result`. Error responses pass through
/// untouched.
pub fn strip_internal_metrics(result: &mut CallToolResult) {
    if result.is_error == Some(true) {
        return;
    }

    if let Some(first) = result.content.first_mut()
        && let RawContent::Text(text) = &mut first.raw
        && let Some(cleaned) = strip_from_json_text(&text.text)
    {
        text.text = cleaned;
    }

    if let Some(structured) = result.structured_content.as_mut()
        && let Some(slot) = structured.get_mut("result")
    {
        match slot {
            Value::Object(object) => {
                for key in METRIC_KEYS {
                    object.remove(key);
                }
            }
            Value::String(s) => {
                if let Some(cleaned) = strip_from_json_text(s) {
                    *s = cleaned;
                }
            }
            _ => {}
        }
    }
}

/// Parse `text` as a JSON object and remove metrics keys
///
/// Returns the re-serialized text only when something was removed, so
/// untouched payloads keep their original formatting.
fn strip_from_json_text(text: &str) -> Option<String> {
    let mut value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object_mut()?;

    let mut removed = false;
    for key in METRIC_KEYS {
        removed |= object.remove(key).is_some();
    }

    removed.then(|| value.to_string())
}
