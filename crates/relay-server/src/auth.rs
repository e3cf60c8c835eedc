use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::StatusCode;

/// Enforce the configured bearer token on non-public paths
pub async fn auth_middleware(
    expected: String,
    public_paths: Vec<String>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if public_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => next.run(request).await,
        _ => {
            tracing::debug!(path, "rejected request without valid bearer token");
            (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
    }
}
