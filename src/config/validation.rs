use url::Url;

use super::ServerConfig;
use crate::core::relay::MIN_PART_SIZE;

/// TLS needs both the certificate and the key, or neither.
pub(super) fn validate_tls_paths(
    cert_path: &Option<String>,
    key_path: &Option<String>,
) -> Result<(), String> {
    match (cert_path, key_path) {
        (Some(_), None) => Err("TLS certificate path set without a key path".to_string()),
        (None, Some(_)) => Err("TLS key path set without a certificate path".to_string()),
        _ => Ok(()),
    }
}

/// The public URL must be absolute and use a scheme the media stream URL
/// can be derived from.
pub(super) fn validate_public_url(public_url: &Option<String>) -> Result<(), String> {
    let Some(public_url) = public_url else {
        return Ok(());
    };
    let url = Url::parse(public_url).map_err(|e| format!("Invalid PUBLIC_URL {public_url:?}: {e}"))?;
    match url.scheme() {
        "ws" | "wss" | "http" | "https" => {}
        other => {
            return Err(format!(
                "PUBLIC_URL must use ws, wss, http or https, got {other:?}"
            ));
        }
    }
    if url.host_str().is_none() {
        return Err(format!("PUBLIC_URL {public_url:?} has no host"));
    }
    Ok(())
}

/// Archive credentials are both-or-neither, and parts must meet the S3 minimum.
pub(super) fn validate_recording(config: &ServerConfig) -> Result<(), String> {
    match (
        &config.recording_s3_access_key,
        &config.recording_s3_secret_key,
    ) {
        (Some(_), None) => {
            return Err("RECORDING_S3_ACCESS_KEY set without RECORDING_S3_SECRET_KEY".to_string());
        }
        (None, Some(_)) => {
            return Err("RECORDING_S3_SECRET_KEY set without RECORDING_S3_ACCESS_KEY".to_string());
        }
        _ => {}
    }

    if config.recording_part_size_bytes < MIN_PART_SIZE {
        return Err(format!(
            "Recording part size must be at least {MIN_PART_SIZE} bytes, got {}",
            config.recording_part_size_bytes
        ));
    }
    Ok(())
}

pub(super) fn validate_call_limits(config: &ServerConfig) -> Result<(), String> {
    if config.max_concurrent_calls == Some(0) {
        return Err("MAX_CONCURRENT_CALLS must be greater than 0".to_string());
    }
    if config.idle_timeout_seconds == Some(0) {
        return Err("IDLE_TIMEOUT_SECONDS must be greater than 0".to_string());
    }
    if let Some(temperature) = config.realtime_temperature
        && !(0.0..=2.0).contains(&temperature)
    {
        return Err(format!(
            "REALTIME_TEMPERATURE must be between 0.0 and 2.0, got {temperature}"
        ));
    }
    Ok(())
}

/// Run every check against a fully merged configuration.
pub(super) fn validate(config: &ServerConfig) -> Result<(), String> {
    validate_public_url(&config.public_url)?;
    validate_recording(config)?;
    validate_call_limits(config)?;
    Ok(())
}
