//! Typed frames for both legs of a call.
//!
//! Raw WebSocket text is decoded into [`TelephonyFrame`] and [`RealtimeEvent`]
//! on the way in, and [`TelephonyCommand`] / [`RealtimeCommand`] are encoded
//! on the way out. Audio payloads are carried as raw bytes; base64 only exists
//! at this boundary.

use base64::prelude::*;
use bytes::Bytes;

use super::error::DecodeError;
use crate::core::realtime::openai::messages::{ClientEvent, EventType, ServerEvent, SessionConfig};
use crate::core::telephony::messages::{
    InboundEvent, MarkLabel, MediaFormat, OutboundEvent, OutboundMedia,
};

// =============================================================================
// Telephony leg
// =============================================================================

/// A decoded frame from the telephony media stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyFrame {
    Connected,
    Start(StreamStart),
    Media(MediaChunk),
    Mark { name: String },
    Stop,
    Unknown,
}

/// Stream metadata from the `start` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: Option<String>,
    pub media_format: Option<MediaFormat>,
}

/// One chunk of caller audio.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaChunk {
    pub payload: Bytes,
    pub timestamp_ms: u64,
}

/// Frames sent to the telephony media stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyCommand {
    Media { stream_sid: String, payload: Bytes },
    Mark { stream_sid: String, name: String },
    Clear { stream_sid: String },
}

/// Decode one text frame from the telephony provider.
pub fn decode_telephony(frame: &[u8]) -> Result<TelephonyFrame, DecodeError> {
    let event: InboundEvent = serde_json::from_slice(frame)?;
    let decoded = match event {
        InboundEvent::Connected => TelephonyFrame::Connected,
        InboundEvent::Start { stream_sid, start } => {
            let stream_sid = stream_sid
                .or(start.stream_sid)
                .filter(|sid| !sid.is_empty())
                .ok_or_else(|| DecodeError::Malformed("start frame without streamSid".into()))?;
            TelephonyFrame::Start(StreamStart {
                stream_sid,
                call_sid: start.call_sid,
                media_format: start.media_format,
            })
        }
        InboundEvent::Media { media, .. } => TelephonyFrame::Media(MediaChunk {
            payload: decode_audio(&media.payload)?,
            timestamp_ms: media.timestamp,
        }),
        InboundEvent::Mark { mark, .. } => TelephonyFrame::Mark { name: mark.name },
        InboundEvent::Stop => TelephonyFrame::Stop,
        InboundEvent::Unknown => TelephonyFrame::Unknown,
    };
    Ok(decoded)
}

/// Encode a command for the telephony provider.
pub fn encode_telephony(command: &TelephonyCommand) -> Result<String, serde_json::Error> {
    let event = match command {
        TelephonyCommand::Media {
            stream_sid,
            payload,
        } => OutboundEvent::Media {
            stream_sid,
            media: OutboundMedia {
                payload: BASE64_STANDARD.encode(payload),
            },
        },
        TelephonyCommand::Mark { stream_sid, name } => OutboundEvent::Mark {
            stream_sid,
            mark: MarkLabel { name: name.clone() },
        },
        TelephonyCommand::Clear { stream_sid } => OutboundEvent::Clear { stream_sid },
    };
    serde_json::to_string(&event)
}

// =============================================================================
// Realtime leg
// =============================================================================

/// A decoded event from the realtime speech API.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    SessionCreated {
        session_id: Option<String>,
    },
    SessionUpdated,
    AudioDelta {
        delta: Bytes,
        item_id: Option<String>,
        response_id: Option<String>,
    },
    SpeechStarted {
        audio_start_ms: u64,
        item_id: Option<String>,
    },
    SpeechStopped {
        audio_end_ms: u64,
    },
    ResponseDone {
        response_id: Option<String>,
        status: Option<String>,
    },
    Error {
        code: Option<String>,
        message: String,
    },
    Unknown {
        kind: String,
    },
}

/// Frames sent to the realtime speech API.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeCommand {
    SessionUpdate(Box<SessionConfig>),
    AudioAppend(Bytes),
    Truncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
}

/// Decode one text frame from the realtime API.
pub fn decode_realtime(frame: &[u8]) -> Result<RealtimeEvent, DecodeError> {
    let event: ServerEvent = serde_json::from_slice(frame)?;
    let decoded = match event {
        ServerEvent::SessionCreated { session } => RealtimeEvent::SessionCreated {
            session_id: session.id,
        },
        ServerEvent::SessionUpdated { .. } => RealtimeEvent::SessionUpdated,
        ServerEvent::AudioDelta {
            response_id,
            item_id,
            delta,
        } => RealtimeEvent::AudioDelta {
            delta: decode_audio(&delta)?,
            item_id,
            response_id,
        },
        ServerEvent::SpeechStarted {
            audio_start_ms,
            item_id,
        } => RealtimeEvent::SpeechStarted {
            audio_start_ms,
            item_id,
        },
        ServerEvent::SpeechStopped { audio_end_ms, .. } => {
            RealtimeEvent::SpeechStopped { audio_end_ms }
        }
        ServerEvent::ResponseDone { response } => {
            let (response_id, status) = response
                .map(|r| (r.id, r.status))
                .unwrap_or_default();
            RealtimeEvent::ResponseDone {
                response_id,
                status,
            }
        }
        ServerEvent::Error { error } => RealtimeEvent::Error {
            code: error.code,
            message: error.message,
        },
        ServerEvent::Unknown => {
            let EventType { kind } = serde_json::from_slice(frame)?;
            RealtimeEvent::Unknown { kind }
        }
    };
    Ok(decoded)
}

/// Encode a command for the realtime API.
pub fn encode_realtime(command: &RealtimeCommand) -> Result<String, serde_json::Error> {
    let event = match command {
        RealtimeCommand::SessionUpdate(session) => ClientEvent::SessionUpdate {
            session: session.as_ref().clone(),
        },
        RealtimeCommand::AudioAppend(audio) => ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(audio),
        },
        RealtimeCommand::Truncate {
            item_id,
            content_index,
            audio_end_ms,
        } => ClientEvent::ConversationItemTruncate {
            item_id: item_id.clone(),
            content_index: *content_index,
            audio_end_ms: *audio_end_ms,
        },
    };
    serde_json::to_string(&event)
}

fn decode_audio(encoded: &str) -> Result<Bytes, DecodeError> {
    BASE64_STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))
}
