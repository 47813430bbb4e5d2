//! OpenAI Realtime API module.
//!
//! # Audio Format
//!
//! The relay negotiates G.711 u-law at 8kHz in both directions so telephony
//! media can be forwarded without transcoding.

mod client;
mod config;
pub mod messages;

pub use client::{
    RealtimeSink, RealtimeSocket, RealtimeStream, build_session_config, connect,
};
pub use config::{
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{ClientEvent, ServerEvent, SessionConfig, TurnDetection};
