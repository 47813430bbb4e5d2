//! Socket adapters for the relay.
//!
//! The relay only deals in text frames. [`FrameSource`] and [`FrameSink`] hide
//! whether a leg is an accepted axum WebSocket, an outbound tungstenite
//! connection, or an in-process channel.

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, trace};

use super::error::RelayError;

/// Read half of a leg.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame. `None` once the peer has closed.
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>>;
}

/// Write half of a leg.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: String) -> Result<(), RelayError>;

    /// Close the leg. Errors are ignored; the peer may already be gone.
    async fn close(&mut self);
}

// =============================================================================
// axum (accepted telephony socket)
// =============================================================================

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            match self.next().await? {
                Ok(AxumMessage::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(AxumMessage::Binary(data)) => {
                    debug!(bytes = data.len(), "Ignoring binary frame");
                }
                Ok(AxumMessage::Close(frame)) => {
                    debug!(?frame, "Peer sent close frame");
                    return None;
                }
                Ok(_) => trace!("Ping/pong frame"),
                Err(e) => return Some(Err(RelayError::Transport(e.to_string()))),
            }
        }
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, AxumMessage> {
    async fn send_frame(&mut self, frame: String) -> Result<(), RelayError> {
        self.send(AxumMessage::Text(frame.into()))
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.send(AxumMessage::Close(None)).await;
        let _ = SinkExt::close(self).await;
    }
}

// =============================================================================
// tungstenite (outbound realtime socket)
// =============================================================================

#[async_trait]
impl<S> FrameSource for SplitStream<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            match self.next().await? {
                Ok(TungsteniteMessage::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(TungsteniteMessage::Binary(data)) => {
                    debug!(bytes = data.len(), "Ignoring binary frame");
                }
                Ok(TungsteniteMessage::Close(frame)) => {
                    debug!(?frame, "Peer sent close frame");
                    return None;
                }
                Ok(_) => trace!("Control frame"),
                Err(e) => return Some(Err(RelayError::Transport(e.to_string()))),
            }
        }
    }
}

#[async_trait]
impl<S> FrameSink for SplitSink<WebSocketStream<S>, TungsteniteMessage>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, frame: String) -> Result<(), RelayError> {
        self.send(TungsteniteMessage::Text(frame.into()))
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = SinkExt::close(self).await;
    }
}

// =============================================================================
// In-process channels
// =============================================================================

#[async_trait]
impl FrameSource for mpsc::Receiver<String> {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        self.recv().await.map(Ok)
    }
}

#[async_trait]
impl FrameSink for mpsc::Sender<String> {
    async fn send_frame(&mut self, frame: String) -> Result<(), RelayError> {
        self.send(frame)
            .await
            .map_err(|_| RelayError::Transport("channel closed".to_string()))
    }

    async fn close(&mut self) {}
}
