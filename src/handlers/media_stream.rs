//! Telephony media stream WebSocket handler
//!
//! Each accepted socket is one phone call. The handler opens the realtime API
//! connection for it and hands both legs to a [`RelaySession`].

use axum::{
    Extension,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::realtime;
use crate::core::relay::{FrameSink, RelaySession};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::{AppState, CallSlot};

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Upgrade the media stream request.
///
/// The call slot is moved into the socket task and released when the call
/// ends. It normally comes from the connection limit middleware; when the
/// route is mounted without it, the slot is reserved here instead.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<CallSlot>>,
) -> AppResult<Response> {
    info!("Media stream connection upgrade requested");

    let slot = match slot {
        Some(Extension(slot)) => slot,
        None => state.try_acquire_call_slot().map_err(|e| {
            warn!(error = %e, "Media stream rejected");
            AppError::ServiceUnavailable("Server at capacity. Please try again later.".into())
        })?,
    };

    Ok(ws
        .max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_stream(socket, state, slot)))
}

async fn handle_media_stream(socket: WebSocket, state: Arc<AppState>, _slot: CallSlot) {
    let (mut telephony_sink, telephony_source) = socket.split();

    let realtime_config = match state.config.realtime_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Cannot start relay");
            telephony_sink.close().await;
            return;
        }
    };

    let (realtime_sink, realtime_source) = match realtime::connect(&realtime_config).await {
        Ok(halves) => halves,
        Err(e) => {
            error!(error = %e, "Failed to connect to realtime API, closing media stream");
            telephony_sink.close().await;
            return;
        }
    };

    let session = RelaySession::new(state.relay_session_config(&realtime_config));
    info!(call_id = %session.call_id(), "Media stream connected");

    let report = session
        .run(telephony_source, telephony_sink, realtime_source, realtime_sink)
        .await;

    info!(
        call_id = %report.call_id,
        stream_sid = ?report.stream_sid,
        decode_errors = report.decode_errors,
        dropped_frames = report.dropped_frames,
        "Media stream finished"
    );
}
