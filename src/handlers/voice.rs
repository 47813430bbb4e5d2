//! Incoming call webhook.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::telephony::{connect_stream_document, media_stream_url};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Answer an incoming call with a TwiML document that connects the call's
/// media stream to this server.
///
/// The stream URL is built from `PUBLIC_URL` when configured, otherwise from
/// the request's `Host` header.
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok());

    let stream_url = media_stream_url(state.config.public_url.as_deref(), host).ok_or_else(|| {
        warn!(host = ?host, "Cannot resolve media stream URL for incoming call");
        AppError::BadRequest("Cannot determine media stream URL".to_string())
    })?;
    debug!(stream_url = %stream_url, "Answering incoming call");

    let twiml = connect_stream_document(state.config.call_greeting.as_deref(), &stream_url);
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"))],
        twiml,
    )
        .into_response())
}
