//! One relayed call.
//!
//! A [`RelaySession`] owns both legs of a call: the telephony media stream and
//! the realtime speech API. Two loops run concurrently:
//!
//! - inbound: telephony frames -> realtime API (caller audio), plus mark acks
//! - outbound: realtime events -> telephony (assistant audio + marks), plus
//!   barge-in handling
//!
//! Each leg has a single writer task fed by an mpsc channel so frames from
//! both loops are never interleaved mid-write. Shared call state sits behind a
//! `parking_lot::Mutex` that is never held across an `.await`.
//!
//! Audio never waits on a writer: when a leg's channel is full the chunk is
//! dropped and counted, so a stalled peer cannot stop the other leg from being
//! read. Control frames wait, but give up once the call is shutting down.
//!
//! When either loop ends the session drains: the other loop is cancelled, the
//! archive upload is finalized, the writers flush, and the sockets close. A
//! writer still blocked after `WRITER_DRAIN_TIMEOUT` is halted and its queued
//! frames are discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::archive::{ArchiveHandle, ArchiveOutcome, ArchiveSettings};
use super::codec::{
    self, RealtimeCommand, RealtimeEvent, StreamStart, TelephonyCommand, TelephonyFrame,
};
use super::error::RelayError;
use super::interruption::PlaybackTracker;
use super::transport::{FrameSink, FrameSource};
use crate::core::realtime::openai::SessionConfig;

/// Capacity of each writer channel.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// How long writers get to flush queued frames once the call is over.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    Idle,
    /// Sockets open, waiting for the stream start frame
    Starting,
    Streaming,
    Draining,
    Closed,
}

/// Per-call settings.
#[derive(Debug, Clone, Default)]
pub struct RelaySessionConfig {
    /// Sent to the realtime API before any audio
    pub session_update: SessionConfig,
    /// Archive settings; `None` disables archival
    pub archive: Option<ArchiveSettings>,
    /// End the call when the telephony leg is silent this long
    pub idle_timeout: Option<Duration>,
}

/// Summary returned once a call has fully closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub call_id: Uuid,
    pub stream_sid: Option<String>,
    pub phase: SessionPhase,
    pub caller_frames: u64,
    pub assistant_frames: u64,
    pub decode_errors: u64,
    /// Audio chunks dropped because a writer was backed up
    pub dropped_frames: u64,
    pub interruptions: u64,
    pub archive: ArchiveOutcome,
}

#[derive(Debug, Default)]
struct SessionStats {
    caller_frames: AtomicU64,
    assistant_frames: AtomicU64,
    decode_errors: AtomicU64,
    dropped_frames: AtomicU64,
    interruptions: AtomicU64,
}

struct CallState {
    phase: SessionPhase,
    stream_sid: Option<String>,
    playback: PlaybackTracker,
    archive: Option<ArchiveHandle>,
    archive_started: bool,
}

/// State shared by both loops.
struct SessionShared {
    call_id: Uuid,
    state: Mutex<CallState>,
    stats: SessionStats,
    archive: Option<ArchiveSettings>,
}

impl SessionShared {
    fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    fn transition(&self, to: SessionPhase, reason: &str) {
        let mut state = self.state.lock();
        if state.phase < to {
            debug!(call_id = %self.call_id, from = ?state.phase, to = ?to, reason, "Session phase change");
            state.phase = to;
        }
    }

    /// Handle the stream start frame. Only the first one opens the stream.
    fn start_stream(&self, start: &StreamStart) {
        let stream_sid = start.stream_sid.as_str();
        let mut state = self.state.lock();
        if state.phase != SessionPhase::Starting {
            warn!(
                call_id = %self.call_id,
                stream_sid,
                current = ?state.stream_sid,
                "Ignoring repeated stream start"
            );
            return;
        }

        info!(
            call_id = %self.call_id,
            stream_sid,
            call_sid = ?start.call_sid,
            encoding = start.media_format.as_ref().map(|f| f.encoding.as_str()),
            sample_rate = start.media_format.as_ref().map(|f| f.sample_rate),
            "Media stream started"
        );
        state.phase = SessionPhase::Streaming;
        state.stream_sid = Some(stream_sid.to_string());
        state.playback.reset_for_stream();

        if !state.archive_started {
            state.archive_started = true;
            state.archive = self
                .archive
                .as_ref()
                .and_then(|settings| ArchiveHandle::spawn(settings, stream_sid));
        }
    }

    fn record_caller_audio(&self, payload: &Bytes, timestamp_ms: u64) {
        let mut state = self.state.lock();
        state.playback.record_media(timestamp_ms);
        if let Some(archive) = &state.archive {
            archive.append(payload.clone());
        }
    }

    /// Count an audio chunk dropped because `leg`'s writer is backed up.
    fn drop_audio(&self, leg: &'static str) {
        let dropped = self.stats.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % 100 == 0 {
            warn!(call_id = %self.call_id, leg, dropped, "Writer backed up, dropping audio");
        }
    }

    /// Returns the stream sid and mark name for an assistant chunk, or `None`
    /// when the stream has not started yet.
    fn record_assistant_audio(
        &self,
        delta: &Bytes,
        item_id: Option<&str>,
    ) -> Option<(String, String)> {
        let mut state = self.state.lock();
        let stream_sid = state.stream_sid.clone()?;
        if let Some(archive) = &state.archive {
            archive.append(delta.clone());
        }
        let mark = state.playback.record_audio_delta(item_id);
        Some((stream_sid, mark))
    }
}

/// A relayed call between a telephony media stream and the realtime API.
pub struct RelaySession {
    shared: Arc<SessionShared>,
    session_update: SessionConfig,
    idle_timeout: Option<Duration>,
}

impl RelaySession {
    pub fn new(config: RelaySessionConfig) -> Self {
        let call_id = Uuid::new_v4();
        let shared = Arc::new(SessionShared {
            call_id,
            state: Mutex::new(CallState {
                phase: SessionPhase::Idle,
                stream_sid: None,
                playback: PlaybackTracker::new(),
                archive: None,
                archive_started: false,
            }),
            stats: SessionStats::default(),
            archive: config.archive,
        });
        shared.transition(SessionPhase::Starting, "sockets accepted");

        Self {
            shared,
            session_update: config.session_update,
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.shared.call_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }

    /// Relay the call until either leg ends, then drain and close both.
    pub async fn run<TS, TK, RS, RK>(
        self,
        telephony_source: TS,
        telephony_sink: TK,
        realtime_source: RS,
        realtime_sink: RK,
    ) -> SessionReport
    where
        TS: FrameSource + 'static,
        TK: FrameSink + 'static,
        RS: FrameSource + 'static,
        RK: FrameSink + 'static,
    {
        let shared = self.shared;
        let call_id = shared.call_id;
        let shutdown = CancellationToken::new();
        let halt_writers = CancellationToken::new();
        info!(call_id = %call_id, "Relay session starting");

        let (telephony_tx, telephony_rx) = mpsc::channel::<TelephonyCommand>(CHANNEL_BUFFER_SIZE);
        let (realtime_tx, realtime_rx) = mpsc::channel::<RealtimeCommand>(CHANNEL_BUFFER_SIZE);

        let telephony_writer = tokio::spawn(write_frames(
            telephony_sink,
            telephony_rx,
            codec::encode_telephony,
            shutdown.clone(),
            halt_writers.clone(),
            "telephony",
        ));
        let realtime_writer = tokio::spawn(write_frames(
            realtime_sink,
            realtime_rx,
            codec::encode_realtime,
            shutdown.clone(),
            halt_writers.clone(),
            "realtime",
        ));

        let update = RealtimeCommand::SessionUpdate(Box::new(self.session_update));
        if let Err(e) = send_control(&realtime_tx, update, &shutdown).await {
            warn!(call_id = %call_id, error = %e, "Session update not sent");
            shutdown.cancel();
        }

        let inbound = tokio::spawn(run_inbound(
            telephony_source,
            shared.clone(),
            realtime_tx.clone(),
            shutdown.clone(),
            self.idle_timeout,
        ));
        let outbound = tokio::spawn(run_outbound(
            realtime_source,
            shared.clone(),
            telephony_tx.clone(),
            realtime_tx.clone(),
            shutdown.clone(),
        ));

        let (inbound_result, outbound_result) = tokio::join!(inbound, outbound);
        log_loop_exit(call_id, "inbound", inbound_result);
        log_loop_exit(call_id, "outbound", outbound_result);

        shared.transition(SessionPhase::Draining, "relay loops finished");
        drop(telephony_tx);
        drop(realtime_tx);

        let archive = shared.state.lock().archive.take();
        let archive = match archive {
            Some(handle) => handle.finish().await,
            None => ArchiveOutcome::Disabled,
        };

        tokio::join!(
            await_writer(call_id, "telephony", telephony_writer, &halt_writers),
            await_writer(call_id, "realtime", realtime_writer, &halt_writers),
        );

        shared.transition(SessionPhase::Closed, "sockets closed");

        let stream_sid = shared.state.lock().stream_sid.clone();
        let report = SessionReport {
            call_id,
            stream_sid,
            phase: shared.phase(),
            caller_frames: shared.stats.caller_frames.load(Ordering::Relaxed),
            assistant_frames: shared.stats.assistant_frames.load(Ordering::Relaxed),
            decode_errors: shared.stats.decode_errors.load(Ordering::Relaxed),
            dropped_frames: shared.stats.dropped_frames.load(Ordering::Relaxed),
            interruptions: shared.stats.interruptions.load(Ordering::Relaxed),
            archive,
        };
        info!(
            call_id = %call_id,
            stream_sid = ?report.stream_sid,
            caller_frames = report.caller_frames,
            assistant_frames = report.assistant_frames,
            dropped_frames = report.dropped_frames,
            interruptions = report.interruptions,
            archive = ?report.archive,
            "Relay session closed"
        );
        report
    }
}

enum Received {
    Frame(String),
    Closed,
    IdleTimeout,
    Failed(RelayError),
    Shutdown,
}

async fn receive<S: FrameSource>(
    source: &mut S,
    shutdown: &CancellationToken,
    idle_timeout: Option<Duration>,
) -> Received {
    let next = async {
        match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, source.next_frame()).await.ok(),
            None => Some(source.next_frame().await),
        }
    };

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Received::Shutdown,
        next = next => match next {
            None => Received::IdleTimeout,
            Some(None) => Received::Closed,
            Some(Some(Ok(frame))) => Received::Frame(frame),
            Some(Some(Err(e))) => Received::Failed(e),
        },
    }
}

/// Telephony -> realtime.
async fn run_inbound<S: FrameSource>(
    mut source: S,
    shared: Arc<SessionShared>,
    realtime_tx: mpsc::Sender<RealtimeCommand>,
    shutdown: CancellationToken,
    idle_timeout: Option<Duration>,
) -> Result<(), RelayError> {
    let call_id = shared.call_id;
    let result = loop {
        let frame = match receive(&mut source, &shutdown, idle_timeout).await {
            Received::Frame(frame) => frame,
            Received::Shutdown => break Ok(()),
            Received::Closed => {
                info!(call_id = %call_id, "Telephony stream closed");
                break Ok(());
            }
            Received::IdleTimeout => {
                warn!(call_id = %call_id, "Telephony stream idle, ending call");
                break Ok(());
            }
            Received::Failed(e) => break Err(e),
        };

        let frame = match codec::decode_telephony(frame.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                shared.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(call_id = %call_id, error = %e, "Dropping undecodable telephony frame");
                continue;
            }
        };

        match frame {
            TelephonyFrame::Connected => debug!(call_id = %call_id, "Telephony stream connected"),
            TelephonyFrame::Start(start) => {
                shared.start_stream(&start);
            }
            TelephonyFrame::Media(chunk) => {
                shared.record_caller_audio(&chunk.payload, chunk.timestamp_ms);
                match realtime_tx.try_send(RealtimeCommand::AudioAppend(chunk.payload)) {
                    Ok(()) => {
                        shared.stats.caller_frames.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => shared.drop_audio("realtime"),
                    Err(TrySendError::Closed(_)) => {
                        break Err(RelayError::Transport("realtime writer stopped".into()));
                    }
                }
            }
            TelephonyFrame::Mark { name } => {
                shared.state.lock().playback.acknowledge_mark(&name);
            }
            TelephonyFrame::Stop => {
                info!(call_id = %call_id, "Telephony stream stopped");
                break Ok(());
            }
            TelephonyFrame::Unknown => trace!(call_id = %call_id, "Ignoring telephony event"),
        }
    };

    shutdown.cancel();
    result
}

/// Realtime -> telephony.
async fn run_outbound<S: FrameSource>(
    mut source: S,
    shared: Arc<SessionShared>,
    telephony_tx: mpsc::Sender<TelephonyCommand>,
    realtime_tx: mpsc::Sender<RealtimeCommand>,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let call_id = shared.call_id;
    let result = loop {
        let frame = match receive(&mut source, &shutdown, None).await {
            Received::Frame(frame) => frame,
            Received::Shutdown => break Ok(()),
            Received::Closed | Received::IdleTimeout => {
                info!(call_id = %call_id, "Realtime connection closed");
                break Ok(());
            }
            Received::Failed(e) => break Err(e),
        };

        let event = match codec::decode_realtime(frame.as_bytes()) {
            Ok(event) => event,
            Err(e) => {
                shared.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(call_id = %call_id, error = %e, "Dropping undecodable realtime event");
                continue;
            }
        };

        match event {
            RealtimeEvent::AudioDelta { delta, item_id, .. } => {
                // Media and its mark go out together or not at all.
                let permits = telephony_tx
                    .try_reserve()
                    .and_then(|media| telephony_tx.try_reserve().map(|mark| (media, mark)));
                let (media_permit, mark_permit) = match permits {
                    Ok(permits) => permits,
                    Err(TrySendError::Full(())) => {
                        shared.drop_audio("telephony");
                        continue;
                    }
                    Err(TrySendError::Closed(())) => {
                        break Err(RelayError::Transport("telephony writer stopped".into()));
                    }
                };
                let Some((stream_sid, mark)) =
                    shared.record_assistant_audio(&delta, item_id.as_deref())
                else {
                    warn!(call_id = %call_id, "Assistant audio before stream start, dropping");
                    continue;
                };
                media_permit.send(TelephonyCommand::Media {
                    stream_sid: stream_sid.clone(),
                    payload: delta,
                });
                mark_permit.send(TelephonyCommand::Mark {
                    stream_sid,
                    name: mark,
                });
                shared.stats.assistant_frames.fetch_add(1, Ordering::Relaxed);
            }
            RealtimeEvent::SpeechStarted { audio_start_ms, .. } => {
                let interruption = {
                    let mut state = shared.state.lock();
                    let stream_sid = state.stream_sid.clone();
                    state.playback.on_speech_started(stream_sid.as_deref())
                };
                match interruption {
                    Ok(interruption) => {
                        info!(
                            call_id = %call_id,
                            audio_start_ms,
                            truncate = ?interruption.truncate,
                            "Caller interrupted assistant"
                        );
                        if let Err(e) =
                            send_control(&realtime_tx, interruption.truncate, &shutdown).await
                        {
                            break Err(e);
                        }
                        if let Err(e) =
                            send_control(&telephony_tx, interruption.clear, &shutdown).await
                        {
                            break Err(e);
                        }
                        shared.stats.interruptions.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => debug!(call_id = %call_id, reason = %e, "Speech start without interruption"),
                }
            }
            RealtimeEvent::SessionCreated { session_id } => {
                info!(call_id = %call_id, session_id = ?session_id, "Realtime session created");
            }
            RealtimeEvent::SessionUpdated => debug!(call_id = %call_id, "Realtime session updated"),
            RealtimeEvent::SpeechStopped { audio_end_ms } => {
                debug!(call_id = %call_id, audio_end_ms, "Caller speech stopped");
            }
            RealtimeEvent::ResponseDone {
                response_id,
                status,
            } => debug!(call_id = %call_id, response_id = ?response_id, status = ?status, "Response done"),
            RealtimeEvent::Error { code, message } => {
                warn!(call_id = %call_id, code = ?code, message, "Realtime API error");
            }
            RealtimeEvent::Unknown { kind } => trace!(call_id = %call_id, kind, "Ignoring realtime event"),
        }
    };

    shutdown.cancel();
    result
}

/// Queue a control frame, waiting for room unless the call is shutting down.
async fn send_control<C>(
    tx: &mpsc::Sender<C>,
    command: C,
    shutdown: &CancellationToken,
) -> Result<(), RelayError> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(RelayError::Transport("call ending, control frame not queued".into())),
        sent = tx.send(command) => sent.map_err(|_| RelayError::Transport("writer stopped".into())),
    }
}

/// Single writer for one leg. Runs until every sender is dropped or `halt`
/// fires, then closes the sink.
async fn write_frames<K, C>(
    mut sink: K,
    mut rx: mpsc::Receiver<C>,
    encode: fn(&C) -> Result<String, serde_json::Error>,
    shutdown: CancellationToken,
    halt: CancellationToken,
    leg: &'static str,
) where
    K: FrameSink,
{
    while let Some(command) = rx.recv().await {
        let frame = match encode(&command) {
            Ok(frame) => frame,
            Err(e) => {
                error!(leg, error = %e, "Failed to encode frame");
                continue;
            }
        };
        let sent = tokio::select! {
            biased;
            _ = halt.cancelled() => {
                warn!(leg, "Writer halted with frames pending");
                return;
            }
            sent = sink.send_frame(frame) => sent,
        };
        if let Err(e) = sent {
            warn!(leg, error = %e, "Write failed, ending call");
            shutdown.cancel();
            break;
        }
    }
    tokio::select! {
        biased;
        _ = halt.cancelled() => {}
        _ = sink.close() => debug!(leg, "Writer closed"),
    }
}

fn log_loop_exit(
    call_id: Uuid,
    name: &str,
    result: Result<Result<(), RelayError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => debug!(call_id = %call_id, loop_name = name, "Loop finished"),
        Ok(Err(e)) => warn!(call_id = %call_id, loop_name = name, error = %e, "Loop ended with error"),
        Err(e) => error!(call_id = %call_id, loop_name = name, error = %e, "Loop task failed"),
    }
}

/// Give a writer [`WRITER_DRAIN_TIMEOUT`] to flush, then halt it.
async fn await_writer(
    call_id: Uuid,
    leg: &str,
    mut writer: JoinHandle<()>,
    halt: &CancellationToken,
) {
    let result = match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(result) => result,
        Err(_) => {
            warn!(call_id = %call_id, leg, "Writer did not drain in time, discarding queued frames");
            halt.cancel();
            writer.await
        }
    };
    if let Err(e) = result {
        error!(call_id = %call_id, leg, error = %e, "Writer task failed");
    }
}
