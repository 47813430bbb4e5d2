use std::path::PathBuf;

use super::utils::{env_parse, env_string};
use super::validation::validate_tls_paths;
use super::{ServerConfig, TlsConfig};

/// Environment variables recognised by the relay, cleared between env tests.
#[cfg(test)]
const ENV_VARS: &[&str] = &[
    "HOST",
    "PORT",
    "TLS_CERT_PATH",
    "TLS_KEY_PATH",
    "PUBLIC_URL",
    "OPENAI_API_KEY",
    "OPENAI_REALTIME_URL",
    "REALTIME_MODEL",
    "REALTIME_VOICE",
    "REALTIME_AUDIO_FORMAT",
    "REALTIME_INSTRUCTIONS",
    "REALTIME_TEMPERATURE",
    "RECORDING_S3_BUCKET",
    "RECORDING_S3_REGION",
    "RECORDING_S3_ENDPOINT",
    "RECORDING_S3_ACCESS_KEY",
    "RECORDING_S3_SECRET_KEY",
    "RECORDING_S3_PREFIX",
    "RECORDING_PART_SIZE_BYTES",
    "CALL_GREETING",
    "MAX_CONCURRENT_CALLS",
    "IDLE_TIMEOUT_SECONDS",
];

/// Build a configuration from environment variables over defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_string("HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse::<u16>("PORT")? {
        config.port = port;
    }

    let cert_path = env_string("TLS_CERT_PATH");
    let key_path = env_string("TLS_KEY_PATH");
    validate_tls_paths(&cert_path, &key_path)?;
    if let (Some(cert_path), Some(key_path)) = (cert_path, key_path) {
        config.tls = Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        });
    }

    config.public_url = env_string("PUBLIC_URL");

    config.openai_api_key = env_string("OPENAI_API_KEY");
    if let Some(url) = env_string("OPENAI_REALTIME_URL") {
        config.realtime_url = url;
    }
    if let Some(model) = env_string("REALTIME_MODEL") {
        config.realtime_model = model;
    }
    if let Some(voice) = env_string("REALTIME_VOICE") {
        config.realtime_voice = voice;
    }
    if let Some(format) = env_string("REALTIME_AUDIO_FORMAT") {
        config.realtime_audio_format = format;
    }
    config.realtime_instructions = env_string("REALTIME_INSTRUCTIONS");
    config.realtime_temperature = env_parse::<f32>("REALTIME_TEMPERATURE")?;

    config.recording_s3_bucket = env_string("RECORDING_S3_BUCKET");
    config.recording_s3_region = env_string("RECORDING_S3_REGION");
    config.recording_s3_endpoint = env_string("RECORDING_S3_ENDPOINT");
    config.recording_s3_access_key = env_string("RECORDING_S3_ACCESS_KEY");
    config.recording_s3_secret_key = env_string("RECORDING_S3_SECRET_KEY");
    config.recording_s3_prefix = env_string("RECORDING_S3_PREFIX");
    if let Some(part_size) = env_parse::<usize>("RECORDING_PART_SIZE_BYTES")? {
        config.recording_part_size_bytes = part_size;
    }

    config.call_greeting = env_string("CALL_GREETING");
    config.max_concurrent_calls = env_parse::<usize>("MAX_CONCURRENT_CALLS")?;
    config.idle_timeout_seconds = env_parse::<u64>("IDLE_TIMEOUT_SECONDS")?;

    Ok(config)
}
