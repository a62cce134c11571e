use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::events::{EventBus, EventKind, EventPayload};
use crate::logger::Direction;
use crate::media::{MediaController, MediaStream};
use crate::messages::{
    build_broadcast_message, build_directed_message, CandidateBody, EnterData, InboundMessage,
    SdpBody, SdpData, Signal,
};
use crate::peer::data_channel::{attach_dc, echo};
use crate::peer::engine::{ConnectionEvent, EngineEvent};
use crate::peer::types::{Member, RtcConfig};
use crate::peer::ConnectionManager;

use super::pending::{Outcome, PendingProcess, ProcessKind, TimerFired};
use super::{DeviceInfo, DeviceStateChange, Role, SessionParams, SessionSnapshot, SessionState};

pub(crate) struct StartTicket {
    pub(crate) stream: MediaStream,
    pub(crate) entry: oneshot::Receiver<Outcome>,
    pub(crate) answer: Option<oneshot::Receiver<Outcome>>,
}

pub(crate) enum Command {
    Start {
        reply: oneshot::Sender<Result<StartTicket>>,
    },
    Inbound {
        message: InboundMessage,
        done: oneshot::Sender<()>,
    },
    ChangeDeviceState {
        change: DeviceStateChange,
        done: oneshot::Sender<()>,
    },
    HangUp {
        done: oneshot::Sender<()>,
    },
    Destroy {
        done: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// `{type: 'rtc-send-props', ...DeviceInfo}`
#[derive(Serialize)]
struct PropsBody {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    device: DeviceInfo,
}

pub(crate) struct SessionActor {
    params: SessionParams,
    rtc_config: RtcConfig,
    bus: EventBus,
    media: MediaController,
    connections: ConnectionManager,
    device: watch::Sender<DeviceInfo>,
    timers: mpsc::UnboundedSender<TimerFired>,
    state: SessionState,
    entered: bool,
    answered: bool,
    entry: Option<PendingProcess>,
    answer: Option<PendingProcess>,
    generation: u64,
}

impl SessionActor {
    pub(crate) fn new(
        params: SessionParams,
        rtc_config: RtcConfig,
        bus: EventBus,
        media: MediaController,
        connections: ConnectionManager,
        device: watch::Sender<DeviceInfo>,
        timers: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        Self {
            params,
            rtc_config,
            bus,
            media,
            connections,
            device,
            timers,
            state: SessionState::Idle,
            entered: false,
            answered: false,
            entry: None,
            answer: None,
            generation: 0,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut engine_events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = engine_events.recv() => self.on_engine_event(event).await,
                Some(fired) = timers.recv() => self.on_timer(fired),
            }
        }

        debug!("all session handles dropped, tearing down");
        self.destroy().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Inbound { message, done } => {
                self.on_inbound(message).await;
                let _ = done.send(());
            }
            Command::ChangeDeviceState { change, done } => {
                self.change_device_state(change);
                let _ = done.send(());
            }
            Command::HangUp { done } => {
                self.hang_up().await;
                let _ = done.send(());
            }
            Command::Destroy { done } => {
                self.destroy().await;
                let _ = done.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn is_initiator(&self) -> bool {
        self.params.role == Role::Initiator
    }

    /// ========== START ==========

    async fn start(&mut self) -> Result<StartTicket> {
        let (stream, availability) = self.media.acquire().await.map_err(SessionError::from)?;
        self.device.send_modify(|info| info.set_availability(availability));

        self.state = SessionState::Entering;
        if self.is_initiator() {
            self.send_available_event(true).await;
        }

        let message = build_broadcast_message(&self.params, EventKind::Enter);
        self.bus
            .emit(EventKind::Enter, EventPayload::Broadcast(message))
            .await;
        let entry = self.arm(ProcessKind::Entry);

        let answer = if self.is_initiator() {
            Some(self.arm(ProcessKind::Answer))
        } else {
            None
        };

        info!(
            role = ?self.params.role,
            consultation = %self.params.consultation_id,
            "session started, waiting for room entry"
        );
        Ok(StartTicket {
            stream,
            entry,
            answer,
        })
    }

    /// Взводит процесс; предыдущий процесс того же вида отменяется
    fn arm(&mut self, kind: ProcessKind) -> oneshot::Receiver<Outcome> {
        self.generation += 1;
        let timeout = match kind {
            ProcessKind::Entry => self.params.enter_timeout(),
            ProcessKind::Answer => self.params.answer_timeout(),
        };
        let (process, rx) = PendingProcess::arm(kind, self.generation, timeout, self.timers.clone());
        if let Some(previous) = self.slot(kind).replace(process) {
            previous.cancel();
        }
        rx
    }

    fn slot(&mut self, kind: ProcessKind) -> &mut Option<PendingProcess> {
        match kind {
            ProcessKind::Entry => &mut self.entry,
            ProcessKind::Answer => &mut self.answer,
        }
    }

    fn on_timer(&mut self, fired: TimerFired) {
        let current = self.slot(fired.kind).as_ref().map(PendingProcess::generation);
        if current != Some(fired.generation) {
            return;
        }

        let err = fired.kind.timeout_error();
        warn!(process = ?fired.kind, "handshake timed out: {}", err);

        if let Some(process) = self.slot(fired.kind).take() {
            process.fail(err.clone());
        }
        // второй процесс тоже снимаем, start() уже отклонён
        let other = match fired.kind {
            ProcessKind::Entry => ProcessKind::Answer,
            ProcessKind::Answer => ProcessKind::Entry,
        };
        if let Some(process) = self.slot(other).take() {
            process.fail(err);
        }

        if self.connections.current().is_none() {
            self.state = SessionState::Idle;
        }
    }

    /// ========== INBOUND ==========

    async fn on_inbound(&mut self, message: InboundMessage) {
        if let Some(kind) = message.event_kind() {
            self.bus
                .audit()
                .append(Direction::In, kind, message.data.clone());
        }

        let Some(signal) = message.signal() else {
            return;
        };

        match signal {
            Signal::EnterAck(data) => self.on_enter_ack(data).await,
            Signal::Offer(data) => {
                if self.is_initiator() {
                    self.on_offer(data).await;
                }
            }
            Signal::Answer(data) => {
                if !self.is_initiator() {
                    self.on_answer(data).await;
                }
            }
            Signal::Properties(props) => {
                self.bus
                    .emit(EventKind::RespondentProps, EventPayload::Properties(props))
                    .await;
            }
            Signal::IceCandidate(data) => {
                self.connections.queue_or_apply_candidate(data.sdp).await;
            }
            Signal::HangUp => {
                self.bus
                    .emit(EventKind::HangUpReceive, EventPayload::Empty)
                    .await;
            }
            Signal::Unknown(kind) => debug!(%kind, "ignoring inbound message"),
        }
    }

    async fn on_enter_ack(&mut self, data: EnterData) {
        let Some(process) = self.entry.take() else {
            debug!("entry ack without a pending entry, ignored");
            return;
        };
        process.resolve();
        self.entered = true;

        if !data.iceservers.is_empty() {
            self.rtc_config.ice_servers = data.iceservers;
        }
        self.params.connection_id = data.sender.connection_id.clone();
        self.params.name = self.params.client_id.clone();

        self.state = if self.answer.is_some() {
            SessionState::AwaitingAnswer
        } else {
            SessionState::Active
        };
        info!(connection = ?self.params.connection_id, "entered the room");

        // посетитель подключается сразу после входа
        if !self.is_initiator() {
            let member = Member {
                client_id: data.sender.client_id,
                name: self.params.name.clone(),
            };
            self.connect_member(None, member).await;
        }
    }

    async fn on_offer(&mut self, data: SdpData) {
        if let Some(process) = self.answer.take() {
            process.resolve();
        }
        self.answered = true;
        self.state = SessionState::Active;

        let target = data.sender.connection_id.clone();
        let member = Member {
            client_id: data.sender.client_id.clone(),
            name: data.sender.client_id.clone(),
        };
        if !self.connect_member(target.clone(), member).await {
            return;
        }

        let Some(answer) = self.connections.apply_remote_offer(data.sdp).await else {
            return;
        };
        let body = SdpBody {
            kind: EventKind::VideoAnswer.wire_name(),
            sdp: &answer,
        };
        self.publish_directed(EventKind::VideoAnswer, target.as_deref(), &body)
            .await;
    }

    async fn on_answer(&mut self, data: SdpData) {
        if self.connections.current().is_none() {
            return;
        }
        self.connections.set_connection_id(data.sender.connection_id);
        self.connections.apply_remote_answer(data.sdp).await;
    }

    /// Открывает соединение и подключает к нему локальные треки
    async fn connect_member(&mut self, connection_id: Option<String>, member: Member) -> bool {
        let role = self.params.role.connection_role();
        if let Err(e) = self
            .connections
            .open(&self.rtc_config, connection_id, member, role)
            .await
        {
            warn!("failed to open peer connection: {}", e);
            return false;
        }

        match self.media.acquire().await {
            Ok((stream, availability)) => {
                self.device.send_modify(|info| info.set_availability(availability));
                self.connections.attach_local_media(&stream).await;
                true
            }
            Err(e) => {
                warn!("no local media for the connection: {}", e);
                false
            }
        }
    }

    /// ========== ENGINE ==========

    async fn on_engine_event(&mut self, event: ConnectionEvent) {
        let ConnectionEvent { seq, event } = event;
        if !self.connections.is_current(seq) {
            debug!(seq, ?event, "event from a closed connection, ignored");
            return;
        }

        match event {
            EngineEvent::NegotiationNeeded => {
                // !!! Инициатор offer не создаёт: он его получает, иначе glare !!!
                if self.is_initiator() {
                    return;
                }
                if let Some((target, offer)) = self.connections.create_offer().await {
                    let body = SdpBody {
                        kind: EventKind::VideoOffer.wire_name(),
                        sdp: &offer,
                    };
                    self.publish_directed_detached(EventKind::VideoOffer, target.as_deref(), &body);
                }
            }
            EngineEvent::IceCandidate(candidate) => {
                if let Some(target) = self.connections.record_local_candidate(seq, &candidate) {
                    let body = CandidateBody {
                        kind: EventKind::NewIceCandidate.wire_name(),
                        sdp: &candidate,
                    };
                    self.publish_directed_detached(
                        EventKind::IceCandidateUpdate,
                        target.as_deref(),
                        &body,
                    );
                }
            }
            EngineEvent::IceConnectionState(state) => {
                if let Some(target) = self.connections.on_ice_state(seq, state).await {
                    info!(connection = ?target.connection_id, "ICE failed, reconnecting");
                    self.connect_member(target.connection_id, target.member).await;
                }
            }
            EngineEvent::SignalingState(state) => {
                self.connections.on_signaling_state(seq, state).await;
            }
            EngineEvent::DataChannel(channel) => attach_dc(&channel),
            EngineEvent::DataChannelMessage { channel, message } => echo(&channel, message).await,
            EngineEvent::Track(track) => {
                self.bus
                    .publish_detached(EventKind::ConnectionTrack, EventPayload::Track(track));
                self.send_props();
            }
        }
    }

    /// ========== DEVICES ==========

    fn change_device_state(&mut self, change: DeviceStateChange) {
        self.device.send_modify(|info| info.merge(change));

        if let Some(stream) = self.media.current() {
            if let Some(is_mute) = change.is_mute {
                for track in stream.audio_tracks() {
                    track.set_enabled(!is_mute);
                }
            }
            if let Some(is_hidden) = change.is_hidden {
                for track in stream.video_tracks() {
                    track.set_enabled(!is_hidden);
                }
            }
        }

        self.send_props();
    }

    fn send_props(&self) {
        let body = PropsBody {
            kind: EventKind::SendProps.wire_name(),
            device: *self.device.borrow(),
        };
        let target = self
            .connections
            .current()
            .and_then(|c| c.connection_id().map(str::to_owned));
        self.publish_directed_detached(EventKind::SendProps, target.as_deref(), &body);
    }

    /// ========== TEARDOWN ==========

    async fn hang_up(&mut self) {
        self.media.stop_all_tracks();

        let message = build_broadcast_message(&self.params, EventKind::HangUp);
        self.bus
            .emit(EventKind::HangUp, EventPayload::Broadcast(message))
            .await;
        self.destroy().await;

        if self.is_initiator() {
            self.send_available_event(false).await;
        }
    }

    async fn destroy(&mut self) {
        self.state = SessionState::Closing;
        self.connections.close().await;

        if let Some(process) = self.entry.take() {
            process.cancel();
        }
        if let Some(process) = self.answer.take() {
            process.cancel();
        }
        self.state = SessionState::Idle;
    }

    /// ========== OUTBOUND ==========

    async fn send_available_event(&self, available: bool) {
        let body = json!({
            "type": "rtc-available-event",
            "isRespondentAvailable": available,
            "consultationId": self.params.consultation_id,
            "callType": self.params.call_type(),
            "doctor": self.params.doctor,
        });
        self.publish_directed(EventKind::AvailableEvent, None, &body)
            .await;
    }

    async fn publish_directed<B: Serialize>(&self, kind: EventKind, target: Option<&str>, body: &B) {
        match build_directed_message(&self.params, target, body) {
            Ok(message) => {
                self.bus
                    .emit(kind, EventPayload::Directed(message))
                    .await
            }
            Err(e) => warn!(%kind, "failed to encode outbound message: {}", e),
        }
    }

    fn publish_directed_detached<B: Serialize>(&self, kind: EventKind, target: Option<&str>, body: &B) {
        match build_directed_message(&self.params, target, body) {
            Ok(message) => {
                self.bus
                    .publish_detached(kind, EventPayload::Directed(message));
            }
            Err(e) => warn!(%kind, "failed to encode outbound message: {}", e),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut pending = Vec::new();
        if self.entry.is_some() {
            pending.push(ProcessKind::Entry);
        }
        if self.answer.is_some() {
            pending.push(ProcessKind::Answer);
        }

        let connection = self.connections.current();
        SessionSnapshot {
            state: self.state,
            role: self.params.role,
            entered: self.entered,
            answered: self.answered,
            pending,
            connection_id: self.params.connection_id.clone(),
            name: self.params.name.clone(),
            ice_servers: self.rtc_config.ice_servers.clone(),
            connection: connection.map(|c| c.info()),
            queued_candidates: connection.map_or(0, |c| c.queued_candidates()),
            device: *self.device.borrow(),
        }
    }
}
