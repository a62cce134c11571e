#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use consult_rtc::error::{DeviceFailure, EngineError};
use consult_rtc::events::Event;
use consult_rtc::media::{
    CaptureCanvas, DeviceKind, MediaConstraints, MediaDeviceInfo, MediaDevices,
};
use consult_rtc::peer::{
    ChannelMessage, DataChannel, EngineEventSink, EngineFactory, IceCandidate, PeerEngine,
    RtcConfig, SessionDescription, StatsEntry, StatsReport,
};
use consult_rtc::{
    AuditLog, EventBus, EventKind, InboundMessage, MediaStream, MediaTrack, Role, Session,
    SessionError, SessionHandle, SessionParams, TrackKind,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Даёт актору и отвязанным публикациям отработать
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// ========== ENGINE ==========

/// Общий упорядоченный журнал вызовов всех движков
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: String) {
        self.0.lock().unwrap().push(call);
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.all().iter().position(|c| c == call)
    }

    pub fn contains(&self, call: &str) -> bool {
        self.position(call).is_some()
    }
}

/// Какие вызовы движков должны завершаться ошибкой
#[derive(Default)]
pub struct Failures {
    pub set_remote: AtomicBool,
    pub create_answer: AtomicBool,
    /// строки кандидатов, которые движок отвергает
    pub candidates: Mutex<Vec<String>>,
}

impl Failures {
    pub fn reject_candidate(&self, line: &str) {
        self.candidates.lock().unwrap().push(line.to_owned());
    }
}

pub struct FakeEngine {
    seq: u64,
    calls: CallLog,
    failures: Arc<Failures>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    polls: AtomicU64,
}

#[async_trait]
impl PeerEngine for FakeEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.calls.push(format!("create_offer#{}", self.seq));
        Ok(SessionDescription::offer(format!("offer-{}", self.seq)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.calls.push(format!("create_answer#{}", self.seq));
        if self.failures.create_answer.load(Ordering::SeqCst) {
            return Err(EngineError::Negotiation("answer rejected".into()));
        }
        Ok(SessionDescription::answer(format!("answer-{}", self.seq)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        *self.local.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        if self.failures.set_remote.load(Ordering::SeqCst) {
            self.calls
                .push(format!("set_remote_failed#{}:{}", self.seq, desc.sdp));
            return Err(EngineError::Negotiation("bad description".into()));
        }
        self.calls
            .push(format!("set_remote#{}:{}", self.seq, desc.sdp));
        *self.remote.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if self
            .failures
            .candidates
            .lock()
            .unwrap()
            .contains(&candidate.candidate)
        {
            self.calls
                .push(format!("candidate_failed#{}:{}", self.seq, candidate.candidate));
            return Err(EngineError::Candidate("rejected".into()));
        }
        self.calls
            .push(format!("candidate#{}:{}", self.seq, candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack, _stream: &MediaStream) -> Result<(), EngineError> {
        self.calls.push(format!("track#{}:{}", self.seq, track.id()));
        Ok(())
    }

    /// Счётчики растут на 1000 байт за каждые 2 секунды
    async fn get_stats(&self) -> Result<StatsReport, EngineError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StatsReport {
            entries: vec![
                StatsEntry::OutboundRtp {
                    kind: TrackKind::Audio,
                    bytes_sent: 1000 * n,
                    timestamp: 2000.0 * n as f64,
                    quality_limitation: None,
                    frame_width: None,
                    frame_height: None,
                    frames_per_second: None,
                },
                StatsEntry::CandidatePair {
                    available_outgoing_bitrate: Some(300_000.0),
                },
            ],
        })
    }

    async fn close(&self) {
        self.calls.push(format!("close#{}", self.seq));
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub calls: CallLog,
    pub failures: Arc<Failures>,
    sinks: Mutex<Vec<EngineEventSink>>,
    configs: Mutex<Vec<RtcConfig>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink соединения с номером `seq`, чтобы подать событие движка
    pub fn sink(&self, seq: u64) -> EngineEventSink {
        self.sinks
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.seq() == seq)
            .cloned()
            .unwrap_or_else(|| panic!("no engine #{seq}"))
    }

    pub fn created(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub fn last_config(&self) -> Option<RtcConfig> {
        self.configs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for FakeFactory {
    async fn create(
        &self,
        config: &RtcConfig,
        sink: EngineEventSink,
    ) -> Result<Arc<dyn PeerEngine>, EngineError> {
        let seq = sink.seq();
        self.calls.push(format!("create#{seq}"));
        self.sinks.lock().unwrap().push(sink);
        self.configs.lock().unwrap().push(config.clone());
        Ok(Arc::new(FakeEngine {
            seq,
            calls: self.calls.clone(),
            failures: self.failures.clone(),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            polls: AtomicU64::new(0),
        }))
    }
}

/// Data-channel, запоминающий всё отправленное
pub struct RecordingChannel {
    label: String,
    pub sent: Mutex<Vec<ChannelMessage>>,
}

impl RecordingChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for RecordingChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, message: ChannelMessage) -> Result<(), EngineError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// ========== DEVICES ==========

struct Canvas;

impl CaptureCanvas for Canvas {
    fn capture_stream(&self) -> MediaStream {
        MediaStream::new(vec![MediaTrack::with_id("canvas", TrackKind::Video, "canvas")])
    }
}

/// Камера и микрофон, выдающие треки `cam` и `mic`
pub struct FakeDevices;

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, DeviceFailure> {
        Ok(vec![
            MediaDeviceInfo {
                device_id: "cam-0".into(),
                kind: DeviceKind::VideoInput,
                label: "Camera".into(),
            },
            MediaDeviceInfo {
                device_id: "mic-0".into(),
                kind: DeviceKind::AudioInput,
                label: "Microphone".into(),
            },
        ])
    }

    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, DeviceFailure> {
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::with_id("mic", TrackKind::Audio, "Microphone"));
        }
        if constraints.video {
            tracks.push(MediaTrack::with_id("cam", TrackKind::Video, "Camera"));
        }
        Ok(MediaStream::new(tracks))
    }

    fn create_canvas(&self) -> Result<Arc<dyn CaptureCanvas>, DeviceFailure> {
        Ok(Arc::new(Canvas))
    }
}

/// ========== BUS ==========

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let events = recorder.0.clone();
        bus.subscribe_all(move |event: &Event| events.lock().unwrap().push(event.clone()));
        recorder
    }

    pub fn all(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.all().into_iter().map(|e| e.kind).collect()
    }

    pub fn of(&self, kind: EventKind) -> Vec<Event> {
        self.all().into_iter().filter(|e| e.kind == kind).collect()
    }
}

/// ========== SESSION ==========

pub fn params(role: Role) -> SessionParams {
    SessionParams {
        client_id: match role {
            Role::Initiator => "doctor-1".into(),
            Role::Responder => "visitor-1".into(),
        },
        chat_id: "chat-1".into(),
        consultation_id: "cons-1".into(),
        role,
        ..Default::default()
    }
}

pub struct Harness {
    pub handle: SessionHandle,
    pub factory: Arc<FakeFactory>,
    pub audit: AuditLog,
    pub events: Recorder,
}

impl Harness {
    pub fn spawn(params: SessionParams) -> Self {
        init_tracing();
        let factory = FakeFactory::new();
        let audit = AuditLog::new();
        let bus = EventBus::with_audit(audit.clone());
        let events = Recorder::attach(&bus);
        let handle = Session::builder(params, factory.clone(), Arc::new(FakeDevices))
            .bus(bus)
            .spawn();
        Self {
            handle,
            factory,
            audit,
            events,
        }
    }

    pub fn start(&self) -> JoinHandle<Result<MediaStream, SessionError>> {
        let handle = self.handle.clone();
        tokio::spawn(async move { handle.start().await })
    }

    pub async fn dispatch(&self, kind: &str, data: Value) {
        self.handle
            .dispatch(InboundMessage::new(kind, data))
            .await
            .unwrap();
        settle().await;
    }

    pub async fn emit(&self, seq: u64, event: consult_rtc::peer::EngineEvent) {
        assert!(self.factory.sink(seq).emit(event));
        settle().await;
    }
}

/// ========== INBOUND ==========

pub fn sender(client_id: &str, connection_id: &str) -> Value {
    json!({"chatId": "chat-1", "clientId": client_id, "connectionId": connection_id})
}

pub fn enter_ack(client_id: &str, connection_id: &str) -> Value {
    json!({"sender": sender(client_id, connection_id)})
}

pub fn sdp(kind: &str, body: &str, from: &str) -> Value {
    json!({
        "sdp": {"type": kind, "sdp": body},
        "sender": sender("peer", from),
    })
}

pub fn candidate(line: &str) -> Value {
    json!({"sdp": {"candidate": line, "sdpMid": "0", "sdpMLineIndex": 0}})
}
