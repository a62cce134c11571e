//! Движок peer-connection поверх `webrtc`.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::EngineError;
use crate::logger::log;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::peer::engine::{
    DataChannel, EngineEvent, EngineEventSink, EngineFactory, PeerEngine, StatsEntry, StatsReport,
};
use crate::peer::state::{IceConnectionState, SignalingState};
use crate::peer::types::{
    ChannelMessage, IceCandidate, RemoteTrack, RtcConfig, SdpType, SessionDescription,
};
use crate::utils::now_millis;

/// ========  CONVERSIONS  =========

fn rtc_config(config: &RtcConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.normalized_urls(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(EngineError::Negotiation("rollback is not supported".into()))
        }
    };
    result.map_err(|e| EngineError::Negotiation(e.to_string()))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}

fn signaling_state(state: RTCSignalingState) -> Option<SignalingState> {
    Some(match state {
        RTCSignalingState::Stable => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => return None,
    })
}

fn track_kind(kind: &str) -> Option<TrackKind> {
    match kind {
        "audio" => Some(TrackKind::Audio),
        "video" => Some(TrackKind::Video),
        _ => None,
    }
}

/// Отчёт содержит все пары кандидатов в произвольном порядке.
/// Берём номинированную, при равенстве ту, у которой битрейт выше.
fn active_pair_bitrate(pairs: &[(bool, f64)]) -> Option<f64> {
    pairs
        .iter()
        .max_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)))
        .map(|(_, bitrate)| *bitrate)
}

fn remote_track(track: &TrackRemote) -> Option<RemoteTrack> {
    let kind = match track.kind() {
        RTPCodecType::Audio => TrackKind::Audio,
        RTPCodecType::Video => TrackKind::Video,
        _ => return None,
    };
    Some(RemoteTrack {
        track_id: track.id(),
        stream_id: track.stream_id(),
        kind,
    })
}

fn local_candidate(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    match candidate.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }),
        Err(e) => {
            log(&format!("Failed to serialize local candidate: {:?}", e));
            None
        }
    }
}

/// ========  DATA CHANNEL  =========

struct WebRtcDataChannel(Arc<RTCDataChannel>);

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> String {
        self.0.label().to_string()
    }

    async fn send(&self, message: ChannelMessage) -> Result<(), EngineError> {
        let result = match message {
            ChannelMessage::Text(text) => self.0.send_text(text).await,
            ChannelMessage::Binary(data) => self.0.send(&data).await,
        };
        result
            .map(|_| ())
            .map_err(|e| EngineError::DataChannel(e.to_string()))
    }
}

fn channel_message(msg: DataChannelMessage) -> ChannelMessage {
    if msg.is_string {
        ChannelMessage::Text(String::from_utf8_lossy(&msg.data).into_owned())
    } else {
        ChannelMessage::Binary(Bytes::copy_from_slice(&msg.data))
    }
}

/// ========  ENGINE  =========

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    local_tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl WebRtcPeer {
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Локальный трек по id, чтобы захват мог писать в него сэмплы
    pub fn local_track(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    fn wire(&self, sink: EngineEventSink) {
        let pc = &self.pc;

        let s = sink.clone();
        pc.on_negotiation_needed(Box::new(move || {
            s.emit(EngineEvent::NegotiationNeeded);
            Box::pin(async {})
        }));

        // Trickle-ICE: кандидаты уходят в сигнализацию по мере появления
        let s = sink.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand.as_ref().and_then(local_candidate) {
                Some(candidate) => {
                    s.emit(EngineEvent::IceCandidate(candidate));
                }
                None => log("ICE candidate gathering completed (null candidate received)"),
            }
            Box::pin(async {})
        }));

        let s = sink.clone();
        pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
            log(&format!("ICE connection state changed to: {:?}", st));
            if let Some(state) = ice_state(st) {
                s.emit(EngineEvent::IceConnectionState(state));
            }
            Box::pin(async {})
        }));

        let s = sink.clone();
        pc.on_signaling_state_change(Box::new(move |st: RTCSignalingState| {
            if let Some(state) = signaling_state(st) {
                s.emit(EngineEvent::SignalingState(state));
            }
            Box::pin(async {})
        }));

        let s = sink.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let channel: Arc<dyn DataChannel> = Arc::new(WebRtcDataChannel(dc.clone()));
            s.emit(EngineEvent::DataChannel(channel.clone()));

            let s = s.clone();
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                s.emit(EngineEvent::DataChannelMessage {
                    channel: channel.clone(),
                    message: channel_message(msg),
                });
                Box::pin(async {})
            }));
            Box::pin(async {})
        }));

        let s = sink;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            if let Some(remote) = remote_track(&track) {
                s.emit(EngineEvent::Track(remote));
            }
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl PeerEngine for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        from_rtc_description(offer)
            .ok_or_else(|| EngineError::Negotiation("engine produced an untyped offer".into()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        from_rtc_description(answer)
            .ok_or_else(|| EngineError::Negotiation("engine produced an untyped answer".into()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc_description)
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.pc.remote_description().await.and_then(from_rtc_description)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| EngineError::Candidate(e.to_string()))
    }

    async fn add_track(&self, track: &MediaTrack, stream: &MediaStream) -> Result<(), EngineError> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            stream.id().to_owned(),
        ));

        self.pc
            .add_track(local.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Track(e.to_string()))?;
        self.local_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(local);
        Ok(())
    }

    async fn get_stats(&self) -> Result<StatsReport, EngineError> {
        let stats = self.pc.get_stats().await;
        // Instant из отчёта не переводится в эпоху, берём время опроса
        let timestamp = now_millis() as f64;

        let mut entries = Vec::new();
        let mut pairs = Vec::new();
        for (_, report) in stats.reports {
            match report {
                StatsReportType::OutboundRTP(rtp) => {
                    if let Some(kind) = track_kind(&rtp.kind) {
                        entries.push(StatsEntry::OutboundRtp {
                            kind,
                            bytes_sent: rtp.bytes_sent,
                            timestamp,
                            quality_limitation: None,
                            frame_width: None,
                            frame_height: None,
                            frames_per_second: None,
                        });
                    }
                }
                StatsReportType::InboundRTP(rtp) => {
                    if let Some(kind) = track_kind(&rtp.kind) {
                        entries.push(StatsEntry::InboundRtp {
                            kind,
                            bytes_received: rtp.bytes_received,
                            timestamp,
                        });
                    }
                }
                StatsReportType::CandidatePair(pair) => {
                    pairs.push((pair.nominated, pair.available_outgoing_bitrate));
                }
                _ => {}
            }
        }

        if let Some(bitrate) = active_pair_bitrate(&pairs) {
            entries.push(StatsEntry::CandidatePair {
                available_outgoing_bitrate: Some(bitrate),
            });
        }

        Ok(StatsReport { entries })
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            log(&format!("Failed to close peer connection: {:?}", e));
        }
    }
}

/// Фабрика соединений: отдельный API с кодеками и интерсепторами по умолчанию
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcEngineFactory;

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(
        &self,
        config: &RtcConfig,
        sink: EngineEventSink,
    ) -> Result<Arc<dyn PeerEngine>, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::Create(format!("failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| EngineError::Create(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(rtc_config(config))
            .await
            .map_err(|e| EngineError::Create(e.to_string()))?;
        log(&format!(
            "Created peer connection #{} with {} ICE servers",
            sink.seq(),
            config.ice_servers.len()
        ));

        let peer = WebRtcPeer {
            pc: Arc::new(pc),
            local_tracks: Mutex::new(Vec::new()),
        };
        peer.wire(sink);
        Ok(Arc::new(peer))
    }
}
