//! Call relay between a telephony media stream and the realtime speech API.

pub mod archive;
pub mod codec;
mod error;
pub mod interruption;
pub mod session;
pub mod transport;

pub use archive::{
    ArchiveHandle, ArchiveOutcome, ArchiveSettings, ArchiveUploader, CompletedPart, MIN_PART_SIZE,
};
pub use codec::{
    RealtimeCommand, RealtimeEvent, TelephonyCommand, TelephonyFrame, decode_realtime,
    decode_telephony, encode_realtime, encode_telephony,
};
pub use error::{DecodeError, RelayError, RelayResult, UploadError};
pub use interruption::{Interruption, PlaybackTracker};
pub use session::{RelaySession, RelaySessionConfig, SessionPhase, SessionReport};
pub use transport::{FrameSink, FrameSource};
