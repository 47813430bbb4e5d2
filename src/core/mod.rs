pub mod realtime;
pub mod relay;
pub mod telephony;

pub use realtime::{RealtimeConfig, RealtimeError, RealtimeResult};
pub use relay::{RelayError, RelaySession, RelaySessionConfig, SessionPhase, SessionReport};
