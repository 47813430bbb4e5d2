//! Shared types for the realtime speech connection.
//!
//! The relay talks to exactly one realtime speech API per call. This module
//! holds the error type and the per-call connection settings; the wire
//! protocol lives in the provider module.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::openai::{
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while establishing or configuring the realtime connection.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration
// =============================================================================

/// Connection and session settings for one realtime call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key sent as a bearer token
    pub api_key: String,

    /// WebSocket endpoint, without the model query parameter
    pub url: String,

    /// Model identifier
    pub model: OpenAIRealtimeModel,

    /// Output voice
    pub voice: OpenAIRealtimeVoice,

    /// Audio encoding used in both directions
    pub audio_format: OpenAIRealtimeAudioFormat,

    /// System instructions for the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: OPENAI_REALTIME_URL.to_string(),
            model: OpenAIRealtimeModel::default(),
            voice: OpenAIRealtimeVoice::default(),
            // Telephony media is 8 kHz mu-law, so the API is asked for the same.
            audio_format: OpenAIRealtimeAudioFormat::G711Ulaw,
            instructions: None,
            temperature: None,
        }
    }
}

impl RealtimeConfig {
    /// Full WebSocket URL including the model parameter.
    pub fn ws_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, separator, self.model.as_str())
    }
}
