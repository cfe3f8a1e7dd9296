//! HTTP middleware: auth/origin enforcement, structured request logging, and
//! security headers.
//!
//! Constant-time bearer token comparison via `subtle`, a
//! `tracing::info_span!` per request, and a fixed set of security headers
//! applied to every response.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use subtle::ConstantTimeEq;

use crate::error::{AuthError, ObserverError};

use super::routes::ApiError;
use super::server::ApiState;

/// Bearer token + Origin allowlist enforcement.
pub async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let config = state.store.config();

    if let Some(expected) = &config.auth_token {
        let auth_header = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());

        let token = auth_header.and_then(|v| v.strip_prefix("Bearer "));
        match token {
            Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {}
            _ => {
                tracing::warn!("rejected request: missing or invalid bearer token");
                return Err(ObserverError::from(AuthError::InvalidToken).into());
            }
        }
    }

    if let Some(origin) = request.headers().get("origin").and_then(|v| v.to_str().ok()) {
        if !config.is_origin_allowed(origin) {
            tracing::warn!(origin, "rejected request: origin not allowed");
            return Err(ObserverError::from(AuthError::OriginNotAllowed(origin.to_string())).into());
        }
    }

    Ok(next.run(request).await)
}

/// Structured per-request logging, grouped under one tracing span.
pub async fn logging_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        uri = %uri,
        status_code = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );
    let _guard = span.enter();

    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    span.record("status_code", response.status().as_u16());
    span.record("latency_ms", latency_ms);
    tracing::info!(
        status_code = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    Ok(response)
}

/// Baseline security headers applied to every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    use axum::http::HeaderValue;

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
    );
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'self'; frame-ancestors 'none'"),
    );

    Ok(response)
}
