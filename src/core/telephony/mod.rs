//! Telephony provider integration: media stream messages and call webhooks.

pub mod messages;
pub mod twiml;

pub use twiml::{MEDIA_STREAM_PATH, connect_stream_document, media_stream_url};
