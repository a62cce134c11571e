pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::{Connection, ConnectionManager, Reconnect};
pub use engine::{
    ConnectionEvent, DataChannel, EngineEvent, EngineEventSink, EngineFactory, PeerEngine,
    StatsEntry, StatsReport,
};
pub use state::{IceConnectionState, SignalingState};
pub use types::{
    ChannelMessage, ConnectionInfo, ConnectionRole, IceCandidate, IceServer, Member, RemoteTrack,
    RtcConfig, SessionDescription,
};
