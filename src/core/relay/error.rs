use thiserror::Error;

/// A frame that could not be turned into a typed event.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or JSON missing a required field
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Audio payload is not valid base64
    #[error("Invalid audio payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

/// Failures talking to the archive object store.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to start multipart upload for {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Failed to upload part {part_number}: {source}")]
    Part {
        part_number: usize,
        #[source]
        source: object_store::Error,
    },

    #[error("Failed to complete multipart upload {upload_id}: {source}")]
    Complete {
        upload_id: String,
        #[source]
        source: object_store::Error,
    },
}

/// Errors that end a relay loop or reject an event.
///
/// Decode failures are counted and skipped in place, and upload failures are
/// reported through the archive outcome, so neither appears here.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A socket or writer task went away
    #[error("Transport error: {0}")]
    Transport(String),

    /// Event arrived in a state where it cannot be acted on
    #[error("State error: {0}")]
    State(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
