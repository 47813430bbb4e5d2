//! Concurrent call limit for media stream connections.
//!
//! ```ignore
//! use relay_gateway::middleware::connection_limit_middleware;
//!
//! let media = routes::media::create_media_router().layer(
//!     axum::middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
//! );
//! ```

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::errors::AppError;
use crate::state::{AppState, ConnectionLimitError};

/// Reserve a call slot for each WebSocket upgrade.
///
/// On success the [`CallSlot`](crate::state::CallSlot) is inserted as a
/// request extension; the handler holds it until the call ends. When the
/// server is at capacity the upgrade is refused with 503. Requests that are
/// not WebSocket upgrades pass through untouched.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    match state.try_acquire_call_slot() {
        Ok(slot) => {
            request.extensions_mut().insert(slot);
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                active_calls = state.active_calls(),
                "Rejecting call: concurrent call limit reached"
            );
            AppError::ServiceUnavailable("Server at capacity. Please try again later.".to_string())
                .into_response()
        }
    }
}
