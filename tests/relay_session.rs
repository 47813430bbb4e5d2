//! Integration tests for the relay session over in-process channels
//!
//! These tests verify:
//! - Frame forwarding in both directions, in order
//! - Barge-in: truncate to the realtime API and clear to telephony
//! - Call archival through a multipart store
//! - Shutdown when either leg closes, even if the other leg has stalled

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::{MultipartId, ObjectStore, PutPayload, PutResult};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use relay_gateway::core::realtime::{RealtimeConfig, build_session_config};
use relay_gateway::core::relay::{
    ArchiveOutcome, ArchiveSettings, FrameSink, MIN_PART_SIZE, RelayError, RelaySession,
    RelaySessionConfig, SessionPhase, SessionReport,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    /// Frames the telephony provider sends
    telephony_in: mpsc::Sender<String>,
    /// Frames the relay writes to telephony
    telephony_out: mpsc::Receiver<String>,
    /// Frames the realtime API sends
    realtime_in: mpsc::Sender<String>,
    /// Frames the relay writes to the realtime API
    realtime_out: mpsc::Receiver<String>,
    task: JoinHandle<SessionReport>,
}

fn start_session(config: RelaySessionConfig) -> Harness {
    let (telephony_in, telephony_source) = mpsc::channel(64);
    let (telephony_sink, telephony_out) = mpsc::channel(64);
    let (realtime_in, realtime_source) = mpsc::channel(64);
    let (realtime_sink, realtime_out) = mpsc::channel(64);

    let session = RelaySession::new(config);
    let task = tokio::spawn(session.run(
        telephony_source,
        telephony_sink,
        realtime_source,
        realtime_sink,
    ));

    Harness {
        telephony_in,
        telephony_out,
        realtime_in,
        realtime_out,
        task,
    }
}

fn session_config() -> RelaySessionConfig {
    RelaySessionConfig {
        session_update: build_session_config(&RealtimeConfig::default()),
        ..Default::default()
    }
}

async fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
    let frame = tokio::time::timeout(STEP_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed");
    serde_json::from_str(&frame).unwrap()
}

async fn send(tx: &mpsc::Sender<String>, value: Value) {
    tx.send(value.to_string()).await.unwrap();
}

fn start_frame(stream_sid: &str) -> Value {
    json!({
        "event": "start",
        "streamSid": stream_sid,
        "start": {
            "streamSid": stream_sid,
            "callSid": "CA123",
            "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
        }
    })
}

fn media_frame(stream_sid: &str, payload: &str, timestamp: u64) -> Value {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "track": "inbound", "timestamp": timestamp.to_string(), "payload": payload }
    })
}

fn audio_delta(item_id: &str, delta: &str) -> Value {
    json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "item_id": item_id,
        "delta": delta
    })
}

fn speech_started() -> Value {
    json!({ "type": "input_audio_buffer.speech_started", "audio_start_ms": 500, "item_id": "item_user" })
}

async fn finish(harness: Harness) -> SessionReport {
    let Harness {
        telephony_in,
        mut telephony_out,
        realtime_in,
        mut realtime_out,
        task,
    } = harness;
    drop(telephony_in);

    let report = tokio::time::timeout(STEP_TIMEOUT, task)
        .await
        .expect("session did not finish")
        .unwrap();

    // Writers close their legs once the session is done.
    while telephony_out.recv().await.is_some() {}
    while realtime_out.recv().await.is_some() {}
    drop(realtime_in);
    report
}

/// Expect a session.update first, then return the realtime receiver ready for audio.
async fn expect_session_update(harness: &mut Harness) {
    let update = next_json(&mut harness.realtime_out).await;
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["input_audio_format"], "g711_ulaw");
    assert_eq!(update["session"]["output_audio_format"], "g711_ulaw");
    assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");
}

#[tokio::test]
async fn test_forwards_audio_in_order() {
    let mut harness = start_session(session_config());
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, json!({ "event": "connected", "protocol": "Call" })).await;
    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 20)).await;
    send(&harness.telephony_in, media_frame("MZ1", "BAUG", 40)).await;

    let first = next_json(&mut harness.realtime_out).await;
    assert_eq!(first, json!({ "type": "input_audio_buffer.append", "audio": "AQID" }));
    let second = next_json(&mut harness.realtime_out).await;
    assert_eq!(second, json!({ "type": "input_audio_buffer.append", "audio": "BAUG" }));

    send(&harness.realtime_in, audio_delta("item_1", "BwgJ")).await;
    let media = next_json(&mut harness.telephony_out).await;
    assert_eq!(
        media,
        json!({ "event": "media", "streamSid": "MZ1", "media": { "payload": "BwgJ" } })
    );
    let mark = next_json(&mut harness.telephony_out).await;
    assert_eq!(mark["event"], "mark");
    assert_eq!(mark["streamSid"], "MZ1");
    assert!(mark["mark"]["name"].as_str().unwrap().starts_with("playback-"));

    let report = finish(harness).await;
    assert_eq!(report.phase, SessionPhase::Closed);
    assert_eq!(report.stream_sid.as_deref(), Some("MZ1"));
    assert_eq!(report.caller_frames, 2);
    assert_eq!(report.assistant_frames, 1);
    assert_eq!(report.interruptions, 0);
    assert_eq!(report.archive, ArchiveOutcome::Disabled);
}

#[tokio::test]
async fn test_barge_in_truncates_and_clears() {
    let mut harness = start_session(session_config());
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 1000)).await;
    next_json(&mut harness.realtime_out).await;

    send(&harness.realtime_in, audio_delta("item_1", "BwgJ")).await;
    assert_eq!(next_json(&mut harness.telephony_out).await["event"], "media");
    assert_eq!(next_json(&mut harness.telephony_out).await["event"], "mark");

    send(&harness.telephony_in, media_frame("MZ1", "AQID", 1600)).await;
    next_json(&mut harness.realtime_out).await;

    send(&harness.realtime_in, speech_started()).await;

    let truncate = next_json(&mut harness.realtime_out).await;
    assert_eq!(
        truncate,
        json!({
            "type": "conversation.item.truncate",
            "item_id": "item_1",
            "content_index": 0,
            "audio_end_ms": 600
        })
    );
    let clear = next_json(&mut harness.telephony_out).await;
    assert_eq!(clear, json!({ "event": "clear", "streamSid": "MZ1" }));

    let report = finish(harness).await;
    assert_eq!(report.interruptions, 1);
}

#[tokio::test]
async fn test_speech_after_playback_finished_does_not_interrupt() {
    let mut harness = start_session(session_config());
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 100)).await;
    next_json(&mut harness.realtime_out).await;

    send(&harness.realtime_in, audio_delta("item_1", "BwgJ")).await;
    next_json(&mut harness.telephony_out).await;
    let mark = next_json(&mut harness.telephony_out).await;
    let mark_name = mark["mark"]["name"].as_str().unwrap().to_string();

    // Telephony confirms the audio has played out.
    send(
        &harness.telephony_in,
        json!({ "event": "mark", "streamSid": "MZ1", "mark": { "name": mark_name } }),
    )
    .await;
    send(&harness.telephony_in, media_frame("MZ1", "BAUG", 300)).await;
    next_json(&mut harness.realtime_out).await;

    send(&harness.realtime_in, speech_started()).await;

    // Nothing is truncated, so the next realtime frame is plain caller audio.
    send(&harness.telephony_in, media_frame("MZ1", "CgsM", 320)).await;
    let next = next_json(&mut harness.realtime_out).await;
    assert_eq!(next["type"], "input_audio_buffer.append");
    assert_eq!(next["audio"], "CgsM");

    let report = finish(harness).await;
    assert_eq!(report.interruptions, 0);
}

#[tokio::test]
async fn test_undecodable_frames_are_skipped() {
    let mut harness = start_session(session_config());
    expect_session_update(&mut harness).await;

    harness
        .telephony_in
        .send("not json".to_string())
        .await
        .unwrap();
    send(&harness.telephony_in, json!({ "event": "start" })).await;
    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 20)).await;
    assert_eq!(
        next_json(&mut harness.realtime_out).await["audio"],
        "AQID"
    );

    harness
        .realtime_in
        .send("{\"type\":".to_string())
        .await
        .unwrap();
    send(&harness.realtime_in, json!({ "type": "rate_limits.updated" })).await;
    send(&harness.realtime_in, audio_delta("item_1", "BwgJ")).await;
    assert_eq!(next_json(&mut harness.telephony_out).await["event"], "media");

    let report = finish(harness).await;
    assert_eq!(report.decode_errors, 3);
    assert_eq!(report.caller_frames, 1);
    assert_eq!(report.assistant_frames, 1);
}

#[tokio::test]
async fn test_bad_media_payload_leaves_call_state_untouched() {
    let store = Arc::new(CountingStore::default());
    let mut harness = start_session(archived_session(store.clone()));
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 1000)).await;
    next_json(&mut harness.realtime_out).await;

    send(&harness.realtime_in, audio_delta("item_1", "BwgJ")).await;
    assert_eq!(next_json(&mut harness.telephony_out).await["event"], "media");
    assert_eq!(next_json(&mut harness.telephony_out).await["event"], "mark");

    send(&harness.telephony_in, media_frame("MZ1", "AQID", 1600)).await;
    next_json(&mut harness.realtime_out).await;

    // Not base64: must not advance the caller clock or reach the archive.
    send(
        &harness.telephony_in,
        json!({ "event": "media", "media": { "timestamp": "9000", "payload": "@@" } }),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send(&harness.realtime_in, speech_started()).await;
    let truncate = next_json(&mut harness.realtime_out).await;
    assert_eq!(truncate["type"], "conversation.item.truncate");
    assert_eq!(truncate["audio_end_ms"], 600);
    assert_eq!(
        next_json(&mut harness.telephony_out).await,
        json!({ "event": "clear", "streamSid": "MZ1" })
    );

    let report = finish(harness).await;
    assert_eq!(report.decode_errors, 1);
    assert_eq!(report.caller_frames, 2);
    assert_eq!(report.interruptions, 1);
    assert_eq!(
        report.archive,
        ArchiveOutcome::Completed {
            path: "calls/MZ1/call.ulaw".to_string(),
            parts: 1,
            bytes: 9,
        }
    );
}

#[tokio::test]
async fn test_assistant_audio_before_start_is_dropped() {
    let mut harness = start_session(session_config());
    expect_session_update(&mut harness).await;

    send(&harness.realtime_in, audio_delta("item_1", "BwgJ")).await;
    // Let the outbound loop see the early delta before the stream starts.
    tokio::time::sleep(Duration::from_millis(50)).await;
    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 20)).await;
    next_json(&mut harness.realtime_out).await;

    send(&harness.realtime_in, audio_delta("item_1", "CgsM")).await;
    let media = next_json(&mut harness.telephony_out).await;
    assert_eq!(media["media"]["payload"], "CgsM");

    let report = finish(harness).await;
    assert_eq!(report.assistant_frames, 1);
}

#[tokio::test]
async fn test_realtime_close_ends_call() {
    let mut harness = start_session(session_config());
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 20)).await;
    next_json(&mut harness.realtime_out).await;

    let Harness {
        telephony_in,
        mut telephony_out,
        realtime_in,
        realtime_out,
        task,
    } = harness;
    drop(realtime_in);

    let report = tokio::time::timeout(STEP_TIMEOUT, task)
        .await
        .expect("session did not finish")
        .unwrap();
    assert_eq!(report.phase, SessionPhase::Closed);

    // The telephony writer is gone, so its channel reports closed.
    assert!(telephony_out.recv().await.is_none());
    drop(telephony_in);
    drop(realtime_out);
}

#[tokio::test]
async fn test_stop_frame_ends_call() {
    let mut harness = start_session(session_config());
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(
        &harness.telephony_in,
        json!({ "event": "stop", "streamSid": "MZ1", "stop": { "callSid": "CA123" } }),
    )
    .await;

    let report = tokio::time::timeout(STEP_TIMEOUT, &mut harness.task)
        .await
        .expect("session did not finish")
        .unwrap();
    assert_eq!(report.phase, SessionPhase::Closed);
    assert_eq!(report.caller_frames, 0);
}

#[tokio::test]
async fn test_idle_timeout_ends_call() {
    let mut harness = start_session(RelaySessionConfig {
        idle_timeout: Some(Duration::from_millis(100)),
        ..session_config()
    });
    expect_session_update(&mut harness).await;

    let report = tokio::time::timeout(STEP_TIMEOUT, &mut harness.task)
        .await
        .expect("idle session did not finish")
        .unwrap();
    assert_eq!(report.phase, SessionPhase::Closed);
    assert!(report.stream_sid.is_none());
}

// =============================================================================
// Archival
// =============================================================================

/// Multipart store that counts calls and can fail upload creation.
#[derive(Debug, Default)]
struct CountingStore {
    inner: InMemory,
    creates: AtomicUsize,
    completes: AtomicUsize,
    aborts: AtomicUsize,
    fail_create: bool,
}

impl std::fmt::Display for CountingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CountingStore")
    }
}

#[async_trait]
impl MultipartStore for CountingStore {
    async fn create_multipart(&self, path: &Path) -> object_store::Result<MultipartId> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(object_store::Error::Generic {
                store: "counting",
                source: "create refused".into(),
            });
        }
        self.inner.create_multipart(path).await
    }

    async fn put_part(
        &self,
        path: &Path,
        id: &MultipartId,
        part_idx: usize,
        data: PutPayload,
    ) -> object_store::Result<PartId> {
        self.inner.put_part(path, id, part_idx, data).await
    }

    async fn complete_multipart(
        &self,
        path: &Path,
        id: &MultipartId,
        parts: Vec<PartId>,
    ) -> object_store::Result<PutResult> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.inner.complete_multipart(path, id, parts).await
    }

    async fn abort_multipart(&self, path: &Path, id: &MultipartId) -> object_store::Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_multipart(path, id).await
    }
}

fn archived_session(store: Arc<CountingStore>) -> RelaySessionConfig {
    RelaySessionConfig {
        archive: Some(ArchiveSettings {
            store,
            prefix: Some("calls/".to_string()),
            part_size: MIN_PART_SIZE,
        }),
        ..session_config()
    }
}

#[tokio::test]
async fn test_call_audio_is_archived() {
    let store = Arc::new(CountingStore::default());
    let mut harness = start_session(archived_session(store.clone()));
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 20)).await;
    next_json(&mut harness.realtime_out).await;
    send(&harness.realtime_in, audio_delta("item_1", "BAUG")).await;
    next_json(&mut harness.telephony_out).await;

    let report = finish(harness).await;
    assert_eq!(
        report.archive,
        ArchiveOutcome::Completed {
            path: "calls/MZ1/call.ulaw".to_string(),
            parts: 1,
            bytes: 6,
        }
    );
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(store.completes.load(Ordering::SeqCst), 1);

    let stored = store
        .inner
        .get(&Path::from("calls/MZ1/call.ulaw"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), &[1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_repeated_start_creates_one_upload() {
    let store = Arc::new(CountingStore::default());
    let mut harness = start_session(archived_session(store.clone()));
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, start_frame("MZ2")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 20)).await;
    next_json(&mut harness.realtime_out).await;

    let report = finish(harness).await;
    assert_eq!(report.stream_sid.as_deref(), Some("MZ1"));
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    assert!(matches!(report.archive, ArchiveOutcome::Completed { .. }));
}

#[tokio::test]
async fn test_call_without_audio_aborts_upload() {
    let store = Arc::new(CountingStore::default());
    let mut harness = start_session(archived_session(store.clone()));
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;

    let report = finish(harness).await;
    assert_eq!(report.archive, ArchiveOutcome::Empty);
    assert_eq!(store.completes.load(Ordering::SeqCst), 0);
    assert_eq!(store.aborts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_archive_failure_does_not_stop_relay() {
    let store = Arc::new(CountingStore {
        fail_create: true,
        ..Default::default()
    });
    let mut harness = start_session(archived_session(store.clone()));
    expect_session_update(&mut harness).await;

    send(&harness.telephony_in, start_frame("MZ1")).await;
    send(&harness.telephony_in, media_frame("MZ1", "AQID", 20)).await;
    assert_eq!(next_json(&mut harness.realtime_out).await["audio"], "AQID");
    send(&harness.realtime_in, audio_delta("item_1", "BAUG")).await;
    assert_eq!(next_json(&mut harness.telephony_out).await["event"], "media");

    let report = finish(harness).await;
    assert!(matches!(report.archive, ArchiveOutcome::Failed { .. }));
    assert_eq!(report.caller_frames, 1);
}

/// Realtime peer that accepted the connection but never reads from it.
struct StalledSink;

#[async_trait]
impl FrameSink for StalledSink {
    async fn send_frame(&mut self, _frame: String) -> Result<(), RelayError> {
        std::future::pending().await
    }

    async fn close(&mut self) {}
}

#[tokio::test]
async fn test_stalled_realtime_leg_does_not_block_hangup() {
    let (telephony_in, telephony_source) = mpsc::channel(64);
    let (telephony_sink, mut telephony_out) = mpsc::channel::<String>(64);
    let (_realtime_in, realtime_source) = mpsc::channel::<String>(64);

    let session = RelaySession::new(session_config());
    let task = tokio::spawn(session.run(
        telephony_source,
        telephony_sink,
        realtime_source,
        StalledSink,
    ));

    // More audio than the realtime writer can ever queue.
    send(&telephony_in, start_frame("MZ1")).await;
    for i in 0..1100u64 {
        send(&telephony_in, media_frame("MZ1", "AQID", i * 20)).await;
    }
    send(&telephony_in, json!({ "event": "stop", "streamSid": "MZ1" })).await;
    drop(telephony_in);

    let report = tokio::time::timeout(Duration::from_secs(15), task)
        .await
        .expect("session hung behind a stalled realtime leg")
        .unwrap();
    assert_eq!(report.phase, SessionPhase::Closed);
    assert!(report.dropped_frames > 0);
    assert_eq!(report.caller_frames + report.dropped_frames, 1100);
    assert!(telephony_out.recv().await.is_none());
}
