use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderMap;
use secrecy::SecretString;

use relay_core::{CallerIdentity, RequestContext};

/// Build a [`RequestContext`] from request headers and stash it as an
/// extension for inner components
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let context = from_headers(request.headers());
    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Extract caller identity from the conventional headers
///
/// The end user's API key arrives via `x-api-key` (preferred) or a
/// bearer token; user attribution via `x-user-id` / `x-user-email`.
pub fn from_headers(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };

    let api_key = header("x-api-key").or_else(|| {
        headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned)
    });

    RequestContext::new(CallerIdentity {
        api_key: api_key.map(SecretString::from),
        user_id: header("x-user-id"),
        user_email: header("x-user-email"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use secrecy::ExposeSecret;

    #[test]
    fn api_key_header_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-key"));
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-bearer"),
        );

        let ctx = from_headers(&headers);
        assert_eq!(ctx.caller.api_key.unwrap().expose_secret(), "sk-key");
    }

    #[test]
    fn bearer_token_used_as_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-bearer"),
        );

        let ctx = from_headers(&headers);
        assert_eq!(ctx.caller.api_key.unwrap().expose_secret(), "sk-bearer");
    }

    #[test]
    fn missing_headers_yield_anonymous_context() {
        let ctx = from_headers(&HeaderMap::new());
        assert!(ctx.caller.api_key.is_none());
        assert!(ctx.caller.user_id.is_none());
    }

    #[test]
    fn user_attribution_headers_are_read() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("u-7"));
        headers.insert("x-user-email", HeaderValue::from_static("u@example.com"));

        let ctx = from_headers(&headers);
        assert_eq!(ctx.caller.user_id.as_deref(), Some("u-7"));
        assert_eq!(ctx.caller.user_email.as_deref(), Some("u@example.com"));
    }
}
