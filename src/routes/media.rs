//! Media stream WebSocket route

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::core::telephony::MEDIA_STREAM_PATH;
use crate::handlers::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media stream router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for one call's media stream
///
/// # Protocol
///
/// The telephony provider sends JSON frames tagged by `event`:
/// `connected`, `start`, `media` (base64 u-law), `mark` and `stop`.
///
/// The server answers with `media` frames carrying assistant audio, a `mark`
/// after each one, and `clear` when the caller interrupts.
///
/// Call slots come from the connection limit middleware when it is layered
/// on; without it the handler reserves one itself.
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(MEDIA_STREAM_PATH, get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
