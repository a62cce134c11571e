//! Жизненный цикл соединений видеоконсультации врач/посетитель:
//! вход в комнату через relay, рукопожатие offer/answer, trickle-ICE,
//! переподключение при сбое ICE и метрики битрейта.
//!
//! Сессия работает поверх [`peer::PeerEngine`]; реализация на `webrtc`
//! лежит в [`webrtc_peer`]. Транспорт до relay подключается через
//! [`signaling::forward_outbound`].

pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod messages;
pub mod metrics;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;
pub mod webrtc_peer;

pub use error::{CodecError, EngineError, MediaError, SessionError};
pub use events::{Event, EventBus, EventKind, EventPayload, Severity};
pub use logger::{AuditLog, AuditRecord, Direction};
pub use media::{MediaController, MediaDevices, MediaStream, MediaTrack, TrackKind};
pub use messages::InboundMessage;
pub use session::{
    DeviceStateChange, Role, Session, SessionBuilder, SessionHandle, SessionParams,
    SessionSnapshot, SessionState,
};
pub use signaling::{forward_outbound, ChannelSink, OutboundEnvelope, SignalingSink};
pub use webrtc_peer::WebRtcEngineFactory;
