use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::config::METRICS_INTERVAL;
use crate::error::EngineError;
use crate::events::{EventBus, EventKind, EventPayload};
use crate::logger::log;
use crate::media::MediaStream;
use crate::metrics::{BitrateMetric, MetricInfo, MetricsSampler};
use crate::peer::engine::{ConnectionEvent, EngineEventSink, EngineFactory, PeerEngine};
use crate::peer::ice::{analyze_candidates, CandidateQueue};
use crate::peer::state::{IceAction, IceConnectionState, SignalingState};
use crate::peer::types::{
    ConnectionInfo, ConnectionRole, IceCandidate, Member, RtcConfig, SessionDescription,
};
use crate::session::DeviceInfo;

/// Одно peer-соединение с удалённым участником
pub struct Connection {
    seq: u64,
    connection_id: Option<String>,
    member: Member,
    role: ConnectionRole,
    engine: Arc<dyn PeerEngine>,
    candidates: CandidateQueue,
    local_candidates: Vec<IceCandidate>,
    closing: Arc<AtomicBool>,
    samplers: Vec<MetricsSampler>,
}

impl Connection {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn engine(&self) -> &Arc<dyn PeerEngine> {
        &self.engine
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn queued_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            seq: self.seq,
            connection_id: self.connection_id.clone(),
            member: self.member.clone(),
            role: self.role,
            is_closing: self.is_closing(),
        }
    }
}

/// Куда переподключаться после сбоя ICE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconnect {
    pub connection_id: Option<String>,
    pub member: Member,
}

/// Владеет не более чем одним живым соединением.
/// Новое соединение открывается только после закрытия предыдущего.
pub struct ConnectionManager {
    factory: Arc<dyn EngineFactory>,
    bus: EventBus,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    metric_info: MetricInfo,
    device: watch::Receiver<DeviceInfo>,
    metrics_interval: Duration,
    next_seq: u64,
    current: Option<Connection>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        bus: EventBus,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        metric_info: MetricInfo,
        device: watch::Receiver<DeviceInfo>,
    ) -> Self {
        Self {
            factory,
            bus,
            events,
            metric_info,
            device,
            metrics_interval: METRICS_INTERVAL,
            next_seq: 0,
            current: None,
        }
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn current(&self) -> Option<&Connection> {
        self.current.as_ref()
    }

    /// Событие от этого соединения, а не от уже закрытого
    pub fn is_current(&self, seq: u64) -> bool {
        self.current.as_ref().is_some_and(|c| c.seq == seq)
    }

    pub async fn open(
        &mut self,
        config: &RtcConfig,
        connection_id: Option<String>,
        member: Member,
        role: ConnectionRole,
    ) -> Result<&Connection, EngineError> {
        // Если соединение уже есть, закрываем его до создания нового
        if self.current.is_some() {
            self.close().await;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let sink = EngineEventSink::new(seq, self.events.clone());
        let engine = self.factory.create(config, sink).await?;

        let closing = Arc::new(AtomicBool::new(false));
        let sampler = MetricsSampler::attach(
            engine.clone(),
            self.bus.clone(),
            closing.clone(),
            BitrateMetric::new(self.metric_info.clone(), self.device.clone()),
            self.metrics_interval,
        );

        let connection = Connection {
            seq,
            connection_id,
            member,
            role,
            engine,
            candidates: CandidateQueue::new(),
            local_candidates: Vec::new(),
            closing,
            samplers: vec![sampler],
        };
        log(&format!(
            "Opened connection #{} to {:?} ({:?})",
            seq, connection.connection_id, connection.role
        ));

        self.bus
            .emit(EventKind::ConnectionNew, EventPayload::Connection(connection.info()))
            .await;
        Ok(self.current.insert(connection))
    }

    pub async fn attach_local_media(&self, stream: &MediaStream) {
        let Some(conn) = &self.current else {
            return;
        };
        for track in stream.tracks() {
            if let Err(e) = conn.engine.add_track(track, stream).await {
                warn!(track = %track.id(), "failed to attach local track: {}", e);
            }
        }
    }

    /// set remote → кандидаты из очереди → answer. Ошибки глотаются.
    pub async fn apply_remote_offer(&mut self, offer: SessionDescription) -> Option<SessionDescription> {
        let conn = self.current.as_mut()?;
        let engine = conn.engine.clone();

        if let Err(e) = engine.set_remote_description(offer).await {
            warn!("failed to apply remote offer: {}", e);
            return None;
        }
        conn.candidates.drain_into(engine.as_ref()).await;

        let answer = match engine.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("failed to create answer: {}", e);
                return None;
            }
        };
        if let Err(e) = engine.set_local_description(answer.clone()).await {
            warn!("failed to set local answer: {}", e);
            return None;
        }

        Some(engine.local_description().await.unwrap_or(answer))
    }

    pub async fn apply_remote_answer(&mut self, answer: SessionDescription) {
        let Some(conn) = self.current.as_mut() else {
            return;
        };
        let engine = conn.engine.clone();

        if let Err(e) = engine.set_remote_description(answer).await {
            warn!("failed to apply remote answer: {}", e);
            return;
        }
        conn.candidates.drain_into(engine.as_ref()).await;
    }

    /// false, если соединения нет и кандидат отброшен
    pub async fn queue_or_apply_candidate(&mut self, candidate: IceCandidate) -> bool {
        let Some(conn) = self.current.as_mut() else {
            log("No peer connection available, dropping candidate");
            return false;
        };
        let engine = conn.engine.clone();
        conn.candidates.queue_or_apply(engine.as_ref(), candidate).await;
        true
    }

    /// Offer для текущего соединения и адресат, которому его отправить
    pub async fn create_offer(&self) -> Option<(Option<String>, SessionDescription)> {
        let conn = self.current.as_ref()?;

        let offer = match conn.engine.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("failed to create offer: {}", e);
                return None;
            }
        };
        if let Err(e) = conn.engine.set_local_description(offer.clone()).await {
            warn!("failed to set local offer: {}", e);
            return None;
        }

        let local = conn.engine.local_description().await.unwrap_or(offer);
        Some((conn.connection_id.clone(), local))
    }

    pub fn set_connection_id(&mut self, connection_id: Option<String>) {
        if let Some(conn) = self.current.as_mut() {
            conn.connection_id = connection_id;
        }
    }

    /// Запоминает локальный кандидат; возвращает адресата для отправки
    pub fn record_local_candidate(&mut self, seq: u64, candidate: &IceCandidate) -> Option<Option<String>> {
        let conn = self.current.as_mut().filter(|c| c.seq == seq)?;
        conn.local_candidates.push(candidate.clone());
        Some(conn.connection_id.clone())
    }

    pub async fn close(&mut self) {
        let Some(conn) = self.current.take() else {
            return;
        };

        conn.closing.store(true, Ordering::SeqCst);
        for sampler in &conn.samplers {
            sampler.detach();
        }
        log(&format!("Closing connection #{}", conn.seq));

        self.bus
            .emit(EventKind::ConnectionClose, EventPayload::Connection(conn.info()))
            .await;
        conn.engine.close().await;
    }

    /// Реакция на смену ICE состояния. Возвращает цель переподключения,
    /// если соединение упало и мы приглашающая сторона.
    pub async fn on_ice_state(&mut self, seq: u64, state: IceConnectionState) -> Option<Reconnect> {
        let conn = self.current.as_ref().filter(|c| c.seq == seq)?;
        log(&format!("ICE connection state changed to: {:?}", state));

        self.bus.publish_detached(
            EventKind::ConnectionIceState,
            EventPayload::IceState {
                connection: conn.info(),
                state,
            },
        );

        match state.action() {
            IceAction::Ignore => None,
            IceAction::HangUp => {
                self.bus
                    .emit(EventKind::HangUpReceive, EventPayload::Empty)
                    .await;
                self.close().await;
                None
            }
            IceAction::Reconnect => {
                let (host, srflx, relay) = analyze_candidates(&conn.local_candidates);
                log(&format!(
                    "ICE failed; local candidates: {} host, {} srflx, {} relay",
                    host, srflx, relay
                ));
                if relay == 0 {
                    warn!("no TURN relay candidates were gathered, NAT traversal may fail");
                }

                // попытка повторного подключения
                let target = (conn.role == ConnectionRole::Inviter).then(|| Reconnect {
                    connection_id: conn.connection_id.clone(),
                    member: conn.member.clone(),
                });
                self.close().await;
                target
            }
        }
    }

    pub async fn on_signaling_state(&mut self, seq: u64, state: SignalingState) {
        if state == SignalingState::Closed && self.is_current(seq) {
            self.close().await;
        }
    }
}
