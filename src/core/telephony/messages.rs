//! Twilio Media Streams WebSocket message types.
//!
//! Inbound events (received from the telephony provider):
//! - connected - Socket established, no stream yet
//! - start - Stream metadata including the stream SID
//! - media - One chunk of base64 mu-law caller audio
//! - mark - Playback of a previously sent mark reached the caller
//! - stop - Stream ended
//!
//! Outbound events (sent to the telephony provider):
//! - media - Audio to play to the caller
//! - mark - Label echoed back once preceding audio has played
//! - clear - Drop all buffered outbound audio

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Inbound Events
// =============================================================================

/// Events received from the telephony media stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected,

    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMetadata,
    },

    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },

    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkLabel,
    },

    Stop,

    #[serde(other)]
    Unknown,
}

/// Metadata carried by the `start` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

/// Audio encoding announced by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Body of an inbound `media` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio
    pub payload: String,
    /// Milliseconds since the stream started
    #[serde(deserialize_with = "timestamp_millis")]
    pub timestamp: u64,
    #[serde(default)]
    pub track: Option<String>,
}

/// Mark label, used in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

/// Twilio sends the media timestamp as a decimal string; integers are accepted too.
fn timestamp_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid timestamp: {text:?}"))),
    }
}

// =============================================================================
// Outbound Events
// =============================================================================

/// Events sent to the telephony media stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
    },

    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: MarkLabel,
    },

    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

/// Body of an outbound `media` event.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    /// Base64-encoded audio
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_event() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC123",
                "streamSid": "MZ123",
                "callSid": "CA123",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"caller": "+15550100"}
            },
            "streamSid": "MZ123"
        }"#;
        match serde_json::from_str::<InboundEvent>(json).unwrap() {
            InboundEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid.as_deref(), Some("MZ123"));
                assert_eq!(start.call_sid.as_deref(), Some("CA123"));
                assert_eq!(start.media_format.unwrap().sample_rate, 8000);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_media_timestamp_string_and_number() {
        let text = r#"{"event":"media","media":{"track":"inbound","chunk":"2","timestamp":"160","payload":"AA=="},"streamSid":"MZ1"}"#;
        let number = r#"{"event":"media","media":{"timestamp":160,"payload":"AA=="}}"#;
        for json in [text, number] {
            match serde_json::from_str::<InboundEvent>(json).unwrap() {
                InboundEvent::Media { media, .. } => assert_eq!(media.timestamp, 160),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_media_timestamp_rejects_garbage() {
        let json = r#"{"event":"media","media":{"timestamp":"soon","payload":"AA=="}}"#;
        assert!(serde_json::from_str::<InboundEvent>(json).is_err());
    }

    #[test]
    fn test_stop_and_unknown_events() {
        let stop = r#"{"event":"stop","sequenceNumber":"5","streamSid":"MZ1","stop":{"accountSid":"AC1","callSid":"CA1"}}"#;
        assert!(matches!(
            serde_json::from_str::<InboundEvent>(stop).unwrap(),
            InboundEvent::Stop
        ));
        let dtmf = r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#;
        assert!(matches!(
            serde_json::from_str::<InboundEvent>(dtmf).unwrap(),
            InboundEvent::Unknown
        ));
    }

    #[test]
    fn test_outbound_clear_shape() {
        let json = serde_json::to_value(OutboundEvent::Clear { stream_sid: "MZ1" }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "clear", "streamSid": "MZ1"}));
    }
}
