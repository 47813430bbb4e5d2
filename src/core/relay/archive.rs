//! Call archival via multipart upload.
//!
//! Both directions of call audio are appended to a single buffer and streamed
//! to object storage in fixed-size parts. The upload is owned by a dedicated
//! task ([`ArchiveHandle`]) so the relay loops never wait on storage.
//!
//! Every upload that is started ends in exactly one of: completed (all parts
//! uploaded, numbered 1..=n without gaps) or aborted. A failed part or a
//! failed completion aborts the upload; nothing is completed afterwards.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use object_store::multipart::MultipartStore;
use object_store::path::Path;
use object_store::{MultipartId, PutPayload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::UploadError;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// File name of the archived audio under the per-stream prefix.
const ARCHIVE_FILE_NAME: &str = "call.ulaw";

/// A part the store has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: usize,
    /// Store-issued content tag (ETag)
    pub content_id: String,
    pub size: usize,
}

/// How an archive upload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Completed {
        path: String,
        parts: usize,
        bytes: u64,
    },
    /// Upload started but no audio was ever appended; it was aborted
    Empty,
    Aborted {
        reason: String,
    },
    /// The upload could not be started
    Failed {
        reason: String,
    },
    /// Archival not configured for this call
    Disabled,
}

/// Where and how to archive calls.
#[derive(Clone)]
pub struct ArchiveSettings {
    pub store: Arc<dyn MultipartStore>,
    pub prefix: Option<String>,
    pub part_size: usize,
}

impl std::fmt::Debug for ArchiveSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSettings")
            .field("prefix", &self.prefix)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

/// Reject stream ids that could escape their key prefix.
pub fn is_valid_stream_id(stream_id: &str) -> bool {
    !stream_id.is_empty() && !stream_id.contains("..") && !stream_id.contains('/')
}

/// Object key for a call archive: `{prefix}/{stream_id}/call.ulaw`.
pub fn build_archive_object_key(prefix: Option<&str>, stream_id: &str) -> String {
    let normalized_prefix = prefix
        .map(|p| p.trim().trim_matches('/'))
        .filter(|p| !p.is_empty());

    match normalized_prefix {
        Some(prefix) => format!("{prefix}/{stream_id}/{ARCHIVE_FILE_NAME}"),
        None => format!("{stream_id}/{ARCHIVE_FILE_NAME}"),
    }
}

// =============================================================================
// Uploader
// =============================================================================

/// Buffers audio and uploads it as multipart parts.
pub struct ArchiveUploader {
    store: Arc<dyn MultipartStore>,
    path: Path,
    upload_id: MultipartId,
    part_size: usize,
    next_part_number: usize,
    pending: BytesMut,
    completed: Vec<CompletedPart>,
    bytes_uploaded: u64,
}

impl ArchiveUploader {
    /// Start a multipart upload at `path`.
    pub async fn create(
        store: Arc<dyn MultipartStore>,
        path: Path,
        part_size: usize,
    ) -> Result<Self, UploadError> {
        let upload_id = store
            .create_multipart(&path)
            .await
            .map_err(|source| UploadError::Create {
                path: path.to_string(),
                source,
            })?;

        info!(path = %path, upload_id = %upload_id, "Started call archive upload");

        Ok(Self {
            store,
            path,
            upload_id,
            part_size: part_size.max(1),
            next_part_number: 1,
            pending: BytesMut::with_capacity(part_size.max(1)),
            completed: Vec::new(),
            bytes_uploaded: 0,
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes buffered but not yet uploaded.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_parts(&self) -> &[CompletedPart] {
        &self.completed
    }

    pub fn append(&mut self, audio: &[u8]) {
        self.pending.extend_from_slice(audio);
    }

    /// Upload one full part if enough audio is buffered.
    ///
    /// Uploads at most one part per call; callers loop until `Ok(None)`.
    pub async fn maybe_flush(&mut self) -> Result<Option<CompletedPart>, UploadError> {
        if self.pending.len() < self.part_size {
            return Ok(None);
        }
        let body = self.pending.split_to(self.part_size).freeze();
        self.upload_part(body).await.map(Some)
    }

    async fn upload_part(&mut self, body: Bytes) -> Result<CompletedPart, UploadError> {
        let part_number = self.next_part_number;
        let size = body.len();

        let part_id = self
            .store
            .put_part(
                &self.path,
                &self.upload_id,
                part_number - 1,
                PutPayload::from(body),
            )
            .await
            .map_err(|source| UploadError::Part {
                part_number,
                source,
            })?;

        self.next_part_number += 1;
        self.bytes_uploaded += size as u64;

        let part = CompletedPart {
            part_number,
            content_id: part_id.content_id,
            size,
        };
        debug!(
            upload_id = %self.upload_id,
            part_number,
            size,
            "Uploaded archive part"
        );
        self.completed.push(part.clone());
        Ok(part)
    }

    /// Upload the remainder and complete the upload, aborting on any failure.
    pub async fn finalize(mut self) -> ArchiveOutcome {
        if !self.pending.is_empty() {
            let body = self.pending.split().freeze();
            if let Err(e) = self.upload_part(body).await {
                error!(upload_id = %self.upload_id, error = %e, "Final archive part failed");
                return self.abort(e.to_string()).await;
            }
        }

        if self.completed.is_empty() {
            info!(upload_id = %self.upload_id, "No audio archived, aborting upload");
            self.abort_upload().await;
            return ArchiveOutcome::Empty;
        }

        let parts = self
            .completed
            .iter()
            .map(|part| object_store::multipart::PartId {
                content_id: part.content_id.clone(),
            })
            .collect();

        match self
            .store
            .complete_multipart(&self.path, &self.upload_id, parts)
            .await
        {
            Ok(_) => {
                info!(
                    path = %self.path,
                    parts = self.completed.len(),
                    bytes = self.bytes_uploaded,
                    "Call archive upload completed"
                );
                ArchiveOutcome::Completed {
                    path: self.path.to_string(),
                    parts: self.completed.len(),
                    bytes: self.bytes_uploaded,
                }
            }
            Err(source) => {
                let err = UploadError::Complete {
                    upload_id: self.upload_id.clone(),
                    source,
                };
                error!(error = %err, "Failed to complete archive upload");
                self.abort(err.to_string()).await
            }
        }
    }

    /// Abort the upload, discarding every uploaded part.
    pub async fn abort(self, reason: impl Into<String>) -> ArchiveOutcome {
        let reason = reason.into();
        warn!(upload_id = %self.upload_id, reason = %reason, "Aborting call archive upload");
        self.abort_upload().await;
        ArchiveOutcome::Aborted { reason }
    }

    async fn abort_upload(&self) {
        if let Err(e) = self
            .store
            .abort_multipart(&self.path, &self.upload_id)
            .await
        {
            error!(upload_id = %self.upload_id, error = %e, "Failed to abort archive upload");
        }
    }
}

// =============================================================================
// Archive task
// =============================================================================

/// Handle to the task that owns a call's archive upload.
///
/// Dropping the handle without calling [`finish`](Self::finish) still lets the
/// task finalize the upload on its own once the channel closes.
pub struct ArchiveHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<ArchiveOutcome>,
}

impl ArchiveHandle {
    /// Spawn the archive task for `stream_id`.
    ///
    /// Returns `None` when the stream id cannot be used as part of an object key.
    pub fn spawn(settings: &ArchiveSettings, stream_id: &str) -> Option<Self> {
        if !is_valid_stream_id(stream_id) {
            warn!(stream_id, "Stream id not usable as archive key, archival disabled");
            return None;
        }
        let key = build_archive_object_key(settings.prefix.as_deref(), stream_id);
        let path = match Path::parse(&key) {
            Ok(path) => path,
            Err(e) => {
                warn!(key, error = %e, "Invalid archive key, archival disabled");
                return None;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_archive(
            settings.store.clone(),
            path,
            settings.part_size,
            rx,
        ));
        Some(Self { tx, task })
    }

    /// Queue audio for the archive. Never blocks.
    pub fn append(&self, audio: Bytes) {
        if self.tx.send(audio).is_err() {
            debug!("Archive task no longer accepting audio");
        }
    }

    /// Close the archive and wait for the upload to be completed or aborted.
    pub async fn finish(self) -> ArchiveOutcome {
        let Self { tx, task } = self;
        drop(tx);
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Archive task failed");
                ArchiveOutcome::Failed {
                    reason: format!("archive task failed: {e}"),
                }
            }
        }
    }
}

async fn run_archive(
    store: Arc<dyn MultipartStore>,
    path: Path,
    part_size: usize,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> ArchiveOutcome {
    let mut uploader = match ArchiveUploader::create(store, path, part_size).await {
        Ok(uploader) => uploader,
        Err(e) => {
            error!(error = %e, "Could not start call archive");
            return ArchiveOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };

    while let Some(audio) = rx.recv().await {
        uploader.append(&audio);
        loop {
            match uploader.maybe_flush().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    error!(
                        path = %uploader.path(),
                        upload_id = uploader.upload_id(),
                        error = %e,
                        "Archive part upload failed"
                    );
                    return uploader.abort(e.to_string()).await;
                }
            }
        }
    }

    uploader.finalize().await
}
