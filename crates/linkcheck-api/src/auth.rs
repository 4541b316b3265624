//! Shared-key authorization for the `/api/v1` routes.
//!
//! Clients send the key verbatim in the `Authorization` header. The key is
//! generated on first use and kept in the state store.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::ApiState;
use crate::handlers::{engine_error_response, error_response};

/// Reject requests whose `Authorization` header does not match the shared key.
pub async fn require_shared_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    if state.dev_mode {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(presented) = presented else {
        return error_response("missing authorization header", StatusCode::UNAUTHORIZED);
    };

    let expected = match state.service.shared_key() {
        Ok(key) => key,
        Err(e) => return engine_error_response(&e),
    };
    if presented != expected.key {
        debug!(path = %request.uri().path(), "rejected request with wrong shared key");
        return error_response("invalid shared key", StatusCode::UNAUTHORIZED);
    }

    next.run(request).await
}
