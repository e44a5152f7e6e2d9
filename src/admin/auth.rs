//! Optional basic auth for the admin surface.
//!
//! Enabled only when both `api.username` and `api.password` are
//! configured; otherwise every request passes through.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{HeaderMap, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::http::server::AppState;

pub async fn basic_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let dynamic = state.config.dynamic();
    if dynamic.api_username.is_empty() || dynamic.api_password.is_empty() {
        return next.run(request).await;
    }

    if let Some((username, password)) = decode_basic_credentials(request.headers()) {
        if username == dynamic.api_username && password == dynamic.api_password {
            return next.run(request).await;
        }
    }

    let mut response = (StatusCode::UNAUTHORIZED, "Unauthorized.").into_response();
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"Restricted\""),
    );

    response
}

fn decode_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (username, password) = credentials.split_once(':')?;

    Some((username.to_string(), password.to_string()))
}
