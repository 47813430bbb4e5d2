use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use object_store::aws::AmazonS3Builder;
use object_store::multipart::MultipartStore;
use thiserror::Error;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::core::realtime::{RealtimeConfig, build_session_config};
use crate::core::relay::{ArchiveSettings, RelaySessionConfig};

/// Why a new call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("maximum concurrent calls reached")]
    GlobalLimitReached,
}

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    /// Multipart store for call archives; `None` when archival is off
    pub archive_store: Option<Arc<dyn MultipartStore>>,
    active_calls: Arc<AtomicUsize>,
}

impl AppState {
    /// Build state from configuration, connecting the archive store if one is configured.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let archive_store = build_archive_store(&config);
        Self::with_archive_store(config, archive_store)
    }

    /// Build state with an explicit archive store.
    pub fn with_archive_store(
        config: ServerConfig,
        archive_store: Option<Arc<dyn MultipartStore>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            archive_store,
            active_calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Reserve a call slot. The slot is released when the returned guard is dropped.
    pub fn try_acquire_call_slot(&self) -> Result<CallSlot, ConnectionLimitError> {
        let max_calls = self.config.max_concurrent_calls;
        self.active_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| match max_calls {
                Some(max) if active >= max => None,
                _ => Some(active + 1),
            })
            .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;

        Ok(CallSlot {
            _guard: Arc::new(SlotGuard {
                active_calls: self.active_calls.clone(),
            }),
        })
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::SeqCst)
    }

    /// Per-call relay settings derived from server configuration.
    pub fn relay_session_config(&self, realtime: &RealtimeConfig) -> RelaySessionConfig {
        RelaySessionConfig {
            session_update: build_session_config(realtime),
            archive: self.archive_store.as_ref().map(|store| ArchiveSettings {
                store: store.clone(),
                prefix: self.config.recording_s3_prefix.clone(),
                part_size: self.config.recording_part_size_bytes,
            }),
            idle_timeout: self.config.idle_timeout(),
        }
    }
}

/// A reserved call slot, carried from the middleware into the call handler.
#[derive(Debug, Clone)]
pub struct CallSlot {
    _guard: Arc<SlotGuard>,
}

#[derive(Debug)]
struct SlotGuard {
    active_calls: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active_calls.fetch_sub(1, Ordering::SeqCst);
    }
}

fn build_archive_store(config: &ServerConfig) -> Option<Arc<dyn MultipartStore>> {
    let bucket = config.recording_s3_bucket.as_ref()?;

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if let Some(region) = &config.recording_s3_region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &config.recording_s3_endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    if let (Some(access_key), Some(secret_key)) = (
        &config.recording_s3_access_key,
        &config.recording_s3_secret_key,
    ) {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    match builder.build() {
        Ok(store) => {
            info!(bucket = %bucket, "Call archival enabled");
            Some(Arc::new(store))
        }
        Err(e) => {
            error!(bucket = %bucket, error = %e, "Failed to configure archive store, archival disabled");
            None
        }
    }
}
