//! Barge-in tracking.
//!
//! The tracker follows how much assistant audio the caller has actually heard.
//! Telephony media timestamps give the caller-side clock; each assistant audio
//! chunk is followed by a mark that the provider echoes back once it has played.
//! When the caller starts speaking while marks are outstanding, the assistant
//! item is truncated at the played position and the provider's buffer cleared.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::codec::{RealtimeCommand, TelephonyCommand};
use super::error::{RelayError, RelayResult};

/// Commands that cut off assistant playback.
#[derive(Debug, Clone, PartialEq)]
pub struct Interruption {
    /// Sent to the realtime API
    pub truncate: RealtimeCommand,
    /// Sent to the telephony provider
    pub clear: TelephonyCommand,
}

/// Playback state for the current assistant response.
#[derive(Debug, Default)]
pub struct PlaybackTracker {
    latest_media_timestamp_ms: u64,
    response_start_timestamp_ms: Option<u64>,
    active_response_item_id: Option<String>,
    mark_queue: VecDeque<String>,
    marks_issued: u64,
}

impl PlaybackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the caller clock for a newly started stream.
    pub fn reset_for_stream(&mut self) {
        self.latest_media_timestamp_ms = 0;
        self.active_response_item_id = None;
    }

    /// Record the timestamp of an inbound media frame.
    ///
    /// A timestamp that goes backwards means the provider restarted its clock;
    /// any open response window is re-anchored to the new clock.
    pub fn record_media(&mut self, timestamp_ms: u64) {
        if timestamp_ms < self.latest_media_timestamp_ms {
            warn!(
                previous_ms = self.latest_media_timestamp_ms,
                current_ms = timestamp_ms,
                "Media timestamp went backwards"
            );
            if self.response_start_timestamp_ms.is_some() {
                self.response_start_timestamp_ms = Some(timestamp_ms);
            }
        }
        self.latest_media_timestamp_ms = timestamp_ms;
    }

    /// Record an assistant audio chunk about to be forwarded.
    ///
    /// Returns the mark name to send right after the chunk.
    pub fn record_audio_delta(&mut self, item_id: Option<&str>) -> String {
        let new_item = match (item_id, self.active_response_item_id.as_deref()) {
            (Some(incoming), Some(active)) => incoming != active,
            _ => false,
        };

        if self.response_start_timestamp_ms.is_none() || new_item {
            debug!(
                start_ms = self.latest_media_timestamp_ms,
                item_id = ?item_id,
                "Assistant response playback started"
            );
            self.response_start_timestamp_ms = Some(self.latest_media_timestamp_ms);
        }

        if let Some(item_id) = item_id {
            self.active_response_item_id = Some(item_id.to_string());
        }

        self.marks_issued += 1;
        let name = format!("playback-{}", self.marks_issued);
        self.mark_queue.push_back(name.clone());
        name
    }

    /// Handle a mark echoed back by the telephony provider.
    pub fn acknowledge_mark(&mut self, name: &str) -> Option<String> {
        let acknowledged = self.mark_queue.pop_front();
        match acknowledged.as_deref() {
            Some(expected) if expected != name => {
                debug!(expected, received = name, "Mark acknowledged out of order");
            }
            None => debug!(received = name, "Mark acknowledged with empty queue"),
            _ => {}
        }
        acknowledged
    }

    /// Caller speech detected. Produces truncate and clear commands when
    /// assistant audio is still queued for playback.
    pub fn on_speech_started(&mut self, stream_sid: Option<&str>) -> RelayResult<Interruption> {
        if self.mark_queue.is_empty() {
            return Err(RelayError::State("no assistant audio pending".into()));
        }
        let Some(start_ms) = self.response_start_timestamp_ms else {
            return Err(RelayError::State("no response playback window".into()));
        };
        let Some(item_id) = self.active_response_item_id.clone() else {
            return Err(RelayError::State("no active response item".into()));
        };
        let Some(stream_sid) = stream_sid else {
            return Err(RelayError::State("stream not started".into()));
        };

        let audio_end_ms = match self.latest_media_timestamp_ms.checked_sub(start_ms) {
            Some(elapsed) => elapsed,
            None => {
                warn!(
                    latest_ms = self.latest_media_timestamp_ms,
                    start_ms, "Playback window starts after latest media, truncating at 0"
                );
                0
            }
        };

        self.mark_queue.clear();
        self.active_response_item_id = None;
        self.response_start_timestamp_ms = None;

        Ok(Interruption {
            truncate: RealtimeCommand::Truncate {
                item_id,
                content_index: 0,
                audio_end_ms,
            },
            clear: TelephonyCommand::Clear {
                stream_sid: stream_sid.to_string(),
            },
        })
    }

    pub fn latest_media_timestamp_ms(&self) -> u64 {
        self.latest_media_timestamp_ms
    }

    pub fn response_start_timestamp_ms(&self) -> Option<u64> {
        self.response_start_timestamp_ms
    }

    pub fn active_response_item_id(&self) -> Option<&str> {
        self.active_response_item_id.as_deref()
    }

    pub fn pending_marks(&self) -> usize {
        self.mark_queue.len()
    }
}
