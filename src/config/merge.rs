use std::path::PathBuf;

use super::env::load_from_env;
use super::utils::non_blank;
use super::validation::validate_tls_paths;
use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig};

/// Load the environment configuration and apply YAML overrides on top.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = non_blank(server.host) {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(public_url) = non_blank(server.public_url) {
            config.public_url = Some(public_url);
        }
        if let Some(tls) = server.tls {
            if tls.enabled == Some(false) {
                config.tls = None;
            } else {
                let cert_path = non_blank(tls.cert_path);
                let key_path = non_blank(tls.key_path);
                validate_tls_paths(&cert_path, &key_path)?;
                if let (Some(cert_path), Some(key_path)) = (cert_path, key_path) {
                    config.tls = Some(TlsConfig {
                        cert_path: PathBuf::from(cert_path),
                        key_path: PathBuf::from(key_path),
                    });
                }
            }
        }
    }

    if let Some(realtime) = yaml.realtime {
        if let Some(api_key) = non_blank(realtime.api_key) {
            config.openai_api_key = Some(api_key);
        }
        if let Some(url) = non_blank(realtime.url) {
            config.realtime_url = url;
        }
        if let Some(model) = non_blank(realtime.model) {
            config.realtime_model = model;
        }
        if let Some(voice) = non_blank(realtime.voice) {
            config.realtime_voice = voice;
        }
        if let Some(format) = non_blank(realtime.audio_format) {
            config.realtime_audio_format = format;
        }
        if let Some(instructions) = non_blank(realtime.instructions) {
            config.realtime_instructions = Some(instructions);
        }
        if let Some(temperature) = realtime.temperature {
            config.realtime_temperature = Some(temperature);
        }
    }

    if let Some(recording) = yaml.recording {
        if let Some(bucket) = non_blank(recording.s3_bucket) {
            config.recording_s3_bucket = Some(bucket);
        }
        if let Some(region) = non_blank(recording.s3_region) {
            config.recording_s3_region = Some(region);
        }
        if let Some(endpoint) = non_blank(recording.s3_endpoint) {
            config.recording_s3_endpoint = Some(endpoint);
        }
        if let Some(access_key) = non_blank(recording.s3_access_key) {
            config.recording_s3_access_key = Some(access_key);
        }
        if let Some(secret_key) = non_blank(recording.s3_secret_key) {
            config.recording_s3_secret_key = Some(secret_key);
        }
        if let Some(prefix) = non_blank(recording.s3_prefix) {
            config.recording_s3_prefix = Some(prefix);
        }
        if let Some(part_size) = recording.part_size_bytes {
            config.recording_part_size_bytes = part_size;
        }
    }

    if let Some(call) = yaml.call {
        if let Some(greeting) = non_blank(call.greeting) {
            config.call_greeting = Some(greeting);
        }
        if let Some(max_calls) = call.max_concurrent_calls {
            config.max_concurrent_calls = Some(max_calls);
        }
        if let Some(idle_timeout) = call.idle_timeout_seconds {
            config.idle_timeout_seconds = Some(idle_timeout);
        }
    }

    Ok(config)
}
