//! Граница с движком peer-connection.
//!
//! Сессия не реализует SDP, ICE и шифрование: она управляет движком через
//! [`PeerEngine`] и получает его колбэки как [`EngineEvent`] через
//! [`EngineEventSink`]. Каждый sink помечен порядковым номером соединения,
//! так что события закрытого соединения отбрасываются.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::peer::state::{IceConnectionState, SignalingState};
use crate::peer::types::{ChannelMessage, IceCandidate, RemoteTrack, RtcConfig, SessionDescription};

#[async_trait]
pub trait PeerEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn remote_description(&self) -> Option<SessionDescription>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;
    async fn add_track(&self, track: &MediaTrack, stream: &MediaStream) -> Result<(), EngineError>;
    async fn get_stats(&self) -> Result<StatsReport, EngineError>;
    async fn close(&self);
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        config: &RtcConfig,
        sink: EngineEventSink,
    ) -> Result<Arc<dyn PeerEngine>, EngineError>;
}

/// Data-channel, открытый удалённой стороной
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    async fn send(&self, message: ChannelMessage) -> Result<(), EngineError>;
}

/// Колбэки движка
#[derive(Clone)]
pub enum EngineEvent {
    NegotiationNeeded,
    IceCandidate(IceCandidate),
    IceConnectionState(IceConnectionState),
    SignalingState(SignalingState),
    DataChannel(Arc<dyn DataChannel>),
    DataChannelMessage {
        channel: Arc<dyn DataChannel>,
        message: ChannelMessage,
    },
    Track(RemoteTrack),
}

impl std::fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegotiationNeeded => write!(f, "NegotiationNeeded"),
            Self::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            Self::IceConnectionState(s) => f.debug_tuple("IceConnectionState").field(s).finish(),
            Self::SignalingState(s) => f.debug_tuple("SignalingState").field(s).finish(),
            Self::DataChannel(dc) => f.debug_tuple("DataChannel").field(&dc.label()).finish(),
            Self::DataChannelMessage { channel, message } => f
                .debug_struct("DataChannelMessage")
                .field("channel", &channel.label())
                .field("message", message)
                .finish(),
            Self::Track(t) => f.debug_tuple("Track").field(t).finish(),
        }
    }
}

/// Событие движка с номером соединения, которому оно принадлежит
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub seq: u64,
    pub event: EngineEvent,
}

/// Куда движок складывает свои колбэки
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    seq: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EngineEventSink {
    pub fn new(seq: u64, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { seq, tx }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// false, если сессия уже завершилась
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(ConnectionEvent {
                seq: self.seq,
                event,
            })
            .is_ok()
    }
}

/// ========== STATS ==========

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityLimitation {
    pub reason: Option<String>,
    pub durations: Option<serde_json::Value>,
    pub resolution_changes: Option<u64>,
}

/// Одна запись отчёта getStats, только нужные нам типы
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEntry {
    OutboundRtp {
        kind: TrackKind,
        bytes_sent: u64,
        /// миллисекунды
        timestamp: f64,
        quality_limitation: Option<QualityLimitation>,
        frame_width: Option<u32>,
        frame_height: Option<u32>,
        frames_per_second: Option<f64>,
    },
    InboundRtp {
        kind: TrackKind,
        bytes_received: u64,
        timestamp: f64,
    },
    CandidatePair {
        available_outgoing_bitrate: Option<f64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub entries: Vec<StatsEntry>,
}
