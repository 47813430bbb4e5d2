//! Configuration module for the relay gateway
//!
//! Server configuration comes from .env files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//! - `utils`: Parsing helpers
//!
//! # Example
//! ```rust,no_run
//! use relay_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

use crate::core::realtime::{
    OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice, RealtimeConfig,
};
use crate::core::relay::MIN_PART_SIZE;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5050;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains everything needed to run the relay:
/// - Server settings (host, port, TLS, public URL)
/// - Realtime API connection settings
/// - Call archive storage (S3)
/// - Per-call settings (greeting, concurrency cap, idle timeout)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    /// Externally reachable base URL; the media stream URL handed to the
    /// telephony provider is derived from it
    pub public_url: Option<String>,

    // Realtime API
    pub openai_api_key: Option<String>,
    pub realtime_url: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub realtime_audio_format: String,
    pub realtime_instructions: Option<String>,
    pub realtime_temperature: Option<f32>,

    // Call archive
    pub recording_s3_bucket: Option<String>,
    pub recording_s3_region: Option<String>,
    pub recording_s3_endpoint: Option<String>,
    pub recording_s3_access_key: Option<String>,
    pub recording_s3_secret_key: Option<String>,
    /// Combined with the stream id: `{prefix}/{stream_id}/call.ulaw`
    pub recording_s3_prefix: Option<String>,
    /// Multipart part size in bytes
    pub recording_part_size_bytes: usize,

    // Calls
    /// Spoken before the media stream connects
    pub call_greeting: Option<String>,
    /// Default: None (unlimited)
    pub max_concurrent_calls: Option<usize>,
    /// Default: None (disabled)
    pub idle_timeout_seconds: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let realtime = RealtimeConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tls: None,
            public_url: None,
            openai_api_key: None,
            realtime_url: realtime.url,
            realtime_model: realtime.model.as_str().to_string(),
            realtime_voice: realtime.voice.as_str().to_string(),
            realtime_audio_format: realtime.audio_format.as_str().to_string(),
            realtime_instructions: None,
            realtime_temperature: None,
            recording_s3_bucket: None,
            recording_s3_region: None,
            recording_s3_endpoint: None,
            recording_s3_access_key: None,
            recording_s3_secret_key: None,
            recording_s3_prefix: None,
            recording_part_size_bytes: MIN_PART_SIZE,
            call_greeting: None,
            max_concurrent_calls: None,
            idle_timeout_seconds: None,
        }
    }
}

/// Zeroize secrets when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.recording_s3_access_key {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.recording_s3_secret_key {
            secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// The .env file is loaded in main.rs before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed,
    /// environment variables have invalid formats, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Returns true if a bucket is configured for call archives
    pub fn is_recording_enabled(&self) -> bool {
        self.recording_s3_bucket.is_some()
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_seconds.map(Duration::from_secs)
    }

    /// Build the realtime connection settings for a call
    ///
    /// # Errors
    /// Returns an error message if no OpenAI API key is configured.
    pub fn realtime_config(&self) -> Result<RealtimeConfig, String> {
        let api_key = self
            .openai_api_key
            .clone()
            .ok_or_else(|| "OpenAI API key not configured in server environment".to_string())?;

        Ok(RealtimeConfig {
            api_key,
            url: self.realtime_url.clone(),
            model: OpenAIRealtimeModel::from_str_or_default(&self.realtime_model),
            voice: OpenAIRealtimeVoice::from_str_or_default(&self.realtime_voice),
            audio_format: OpenAIRealtimeAudioFormat::from_str_or_default(
                &self.realtime_audio_format,
            ),
            instructions: self.realtime_instructions.clone(),
            temperature: self.realtime_temperature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address() {
        let mut config = ServerConfig::default();
        config.host = "127.0.0.1".to_string();
        config.port = 8080;
        assert_eq!(config.address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.is_tls_enabled());
        assert!(!config.is_recording_enabled());
        assert_eq!(config.recording_part_size_bytes, MIN_PART_SIZE);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.realtime_audio_format, "g711_ulaw");
    }

    #[test]
    fn test_realtime_config_requires_key() {
        let config = ServerConfig::default();
        let err = config.realtime_config().unwrap_err();
        assert!(err.contains("OpenAI API key"));
    }

    #[test]
    fn test_realtime_config_maps_fields() {
        let mut config = ServerConfig::default();
        config.openai_api_key = Some("sk-test".to_string());
        config.realtime_voice = "verse".to_string();
        config.realtime_instructions = Some("Be kind.".to_string());
        config.realtime_temperature = Some(0.6);

        let realtime = config.realtime_config().unwrap();
        assert_eq!(realtime.api_key, "sk-test");
        assert_eq!(realtime.voice, OpenAIRealtimeVoice::Verse);
        assert_eq!(realtime.audio_format, OpenAIRealtimeAudioFormat::G711Ulaw);
        assert_eq!(realtime.instructions.as_deref(), Some("Be kind."));
        assert_eq!(realtime.temperature, Some(0.6));
    }

    #[test]
    fn test_idle_timeout() {
        let mut config = ServerConfig::default();
        config.idle_timeout_seconds = Some(30);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
    }
}
