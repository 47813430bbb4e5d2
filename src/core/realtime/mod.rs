//! Realtime speech API connection.
//!
//! Each call opens one WebSocket to the realtime API. The relay session owns
//! both halves of that socket; this module only knows how to open it and
//! what the messages look like.

mod base;
pub mod openai;

pub use base::{RealtimeConfig, RealtimeError, RealtimeResult};
pub use openai::{
    OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice, RealtimeSink,
    RealtimeStream, build_session_config, connect,
};
