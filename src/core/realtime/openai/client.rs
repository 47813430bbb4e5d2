//! Connection setup for the OpenAI Realtime API.
//!
//! The relay does not keep a long-lived client object: each call opens one
//! WebSocket, splits it, and hands both halves to the relay session which
//! owns them for the rest of the call.

use futures::StreamExt;
use futures::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

use super::messages::{SessionConfig, TurnDetection};
use crate::core::realtime::base::{RealtimeConfig, RealtimeError, RealtimeResult};

/// WebSocket stream to the realtime API.
pub type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Write half of the realtime socket.
pub type RealtimeSink = SplitSink<RealtimeSocket, Message>;
/// Read half of the realtime socket.
pub type RealtimeStream = SplitStream<RealtimeSocket>;

/// Open the realtime WebSocket and split it into write and read halves.
pub async fn connect(config: &RealtimeConfig) -> RealtimeResult<(RealtimeSink, RealtimeStream)> {
    if config.api_key.trim().is_empty() {
        return Err(RealtimeError::AuthenticationFailed(
            "API key is required".to_string(),
        ));
    }

    let url = config.ws_url();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|_| {
        RealtimeError::AuthenticationFailed("API key is not a valid header value".to_string())
    })?;
    let headers = request.headers_mut();
    headers.insert("Authorization", bearer);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (ws_stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

    info!(
        status = %response.status(),
        model = %config.model,
        "Connected to OpenAI Realtime API"
    );

    Ok(ws_stream.split())
}

/// Session configuration sent as the first frame on every call.
pub fn build_session_config(config: &RealtimeConfig) -> SessionConfig {
    SessionConfig {
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: config.instructions.clone(),
        voice: Some(config.voice.as_str().to_string()),
        input_audio_format: Some(config.audio_format.as_str().to_string()),
        output_audio_format: Some(config.audio_format.as_str().to_string()),
        turn_detection: Some(TurnDetection::server_vad()),
        temperature: config.temperature,
    }
}
