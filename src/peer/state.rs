use serde::Serialize;

/// Состояние ICE агента (`iceConnectionState`)
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Состояние сигнализации (`signalingState`)
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// Что делать соединению после смены ICE состояния
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceAction {
    Ignore,
    /// Удалённая сторона ушла: событие hang-up и закрытие
    HangUp,
    /// Закрыть и, если мы приглашающие, переподключиться
    Reconnect,
}

impl IceConnectionState {
    pub fn action(self) -> IceAction {
        match self {
            Self::Disconnected | Self::Closed => IceAction::HangUp,
            Self::Failed => IceAction::Reconnect,
            _ => IceAction::Ignore,
        }
    }
}
