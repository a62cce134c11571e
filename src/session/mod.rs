//! Сессия консультации.
//!
//! Вся логика живёт в одной задаче-акторе ([`actor`]): команды от
//! [`SessionHandle`], колбэки движка и таймеры ожиданий приходят в неё
//! через каналы и обрабатываются строго по одному. Входящие сигнальные
//! сообщения поэтому обрабатываются в порядке поступления.

mod actor;
pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{ANSWER_TIMEOUT_DEFAULT, ENTER_TIMEOUT_DEFAULT, MEDIA_TIMEOUT, METRICS_INTERVAL};
use crate::error::{Result, SessionError};
use crate::events::EventBus;
use crate::media::{DeviceAvailability, MediaController, MediaDevices, MediaStream};
use crate::messages::InboundMessage;
use crate::metrics::MetricInfo;
use crate::peer::engine::EngineFactory;
use crate::peer::types::{ConnectionInfo, ConnectionRole, IceServer, RtcConfig};
use crate::peer::ConnectionManager;

use actor::{Command, SessionActor};
pub use pending::ProcessKind;

/// Чья это сторона звонка
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Врач: ждёт offer, при сбое ICE переподключается сам
    Initiator,
    /// Посетитель: подключается после входа в комнату и создаёт offer
    #[default]
    Responder,
}

impl Role {
    pub fn connection_role(self) -> ConnectionRole {
        match self {
            Self::Initiator => ConnectionRole::Inviter,
            Self::Responder => ConnectionRole::Invitee,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DoctorInfo {
    #[serde(default)]
    pub avatar_id: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub speciality_name: String,
}

/// Параметры сессии в том виде, в каком их передаёт веб-клиент
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    #[serde(default)]
    pub name: String,
    pub client_id: String,
    pub chat_id: String,
    /// собственный id соединения с relay, приходит в подтверждении входа
    #[serde(default)]
    pub connection_id: Option<String>,
    pub consultation_id: String,
    #[serde(default)]
    pub doctor: DoctorInfo,
    #[serde(default)]
    pub is_audio: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub enter_timeout_second: Option<u64>,
    #[serde(default)]
    pub answer_timeout_second: Option<u64>,
}

impl SessionParams {
    /// Ноль или отсутствие значения - таймаут по умолчанию
    pub fn enter_timeout(&self) -> Duration {
        Duration::from_secs(
            self.enter_timeout_second
                .filter(|s| *s > 0)
                .unwrap_or(ENTER_TIMEOUT_DEFAULT),
        )
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(
            self.answer_timeout_second
                .filter(|s| *s > 0)
                .unwrap_or(ANSWER_TIMEOUT_DEFAULT),
        )
    }

    pub fn call_type(&self) -> &'static str {
        if self.is_audio {
            "audio"
        } else {
            "video"
        }
    }
}

/// Состояние устройств, которое видит удалённая сторона
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub has_camera: bool,
    pub has_microphone: bool,
    pub is_hidden: bool,
    pub is_mute: bool,
}

impl DeviceInfo {
    pub fn merge(&mut self, change: DeviceStateChange) {
        if let Some(is_mute) = change.is_mute {
            self.is_mute = is_mute;
        }
        if let Some(is_hidden) = change.is_hidden {
            self.is_hidden = is_hidden;
        }
    }

    pub fn set_availability(&mut self, availability: DeviceAvailability) {
        self.has_camera = availability.has_camera;
        self.has_microphone = availability.has_microphone;
    }
}

/// Частичное изменение: непереданные поля не трогаются
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateChange {
    #[serde(default)]
    pub is_mute: Option<bool>,
    #[serde(default)]
    pub is_hidden: Option<bool>,
}

impl DeviceStateChange {
    pub fn mute(is_mute: bool) -> Self {
        Self {
            is_mute: Some(is_mute),
            is_hidden: None,
        }
    }

    pub fn hide(is_hidden: bool) -> Self {
        Self {
            is_mute: None,
            is_hidden: Some(is_hidden),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    #[default]
    Idle,
    Entering,
    AwaitingAnswer,
    Active,
    Closing,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub role: Role,
    pub entered: bool,
    pub answered: bool,
    pub pending: Vec<ProcessKind>,
    pub connection_id: Option<String>,
    pub name: String,
    pub ice_servers: Vec<IceServer>,
    pub connection: Option<ConnectionInfo>,
    pub queued_candidates: usize,
    pub device: DeviceInfo,
}

/// ========== BUILDER ==========

pub struct SessionBuilder {
    params: SessionParams,
    factory: Arc<dyn EngineFactory>,
    devices: Arc<dyn MediaDevices>,
    bus: Option<EventBus>,
    rtc_config: RtcConfig,
    media_timeout: Duration,
    metrics_interval: Duration,
}

impl SessionBuilder {
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn rtc_config(mut self, config: RtcConfig) -> Self {
        self.rtc_config = config;
        self
    }

    pub fn media_timeout(mut self, timeout: Duration) -> Self {
        self.media_timeout = timeout;
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Запускает актор сессии; нужен tokio runtime
    pub fn spawn(self) -> SessionHandle {
        let bus = self.bus.unwrap_or_default();
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (device_tx, device_rx) = watch::channel(DeviceInfo::default());

        let metric_info = MetricInfo {
            client_id: self.params.client_id.clone(),
            consultation_id: self.params.consultation_id.clone(),
        };
        let connections =
            ConnectionManager::new(self.factory, bus.clone(), events_tx, metric_info, device_rx)
                .with_metrics_interval(self.metrics_interval);
        let media = MediaController::with_timeout(self.devices, self.media_timeout);

        let actor = SessionActor::new(
            self.params,
            self.rtc_config,
            bus.clone(),
            media,
            connections,
            device_tx,
            timers_tx,
        );
        tokio::spawn(actor.run(commands_rx, events_rx, timers_rx));

        SessionHandle {
            commands: commands_tx,
            bus,
        }
    }
}

pub struct Session;

impl Session {
    pub fn builder(
        params: SessionParams,
        factory: Arc<dyn EngineFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> SessionBuilder {
        SessionBuilder {
            params,
            factory,
            devices,
            bus: None,
            rtc_config: RtcConfig::default(),
            media_timeout: MEDIA_TIMEOUT,
            metrics_interval: METRICS_INTERVAL,
        }
    }

    pub fn spawn(
        params: SessionParams,
        factory: Arc<dyn EngineFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> SessionHandle {
        Self::builder(params, factory, devices).spawn()
    }
}

/// ========== HANDLE ==========

/// Ручка управления сессией. Когда все ручки сброшены, сессия
/// завершается так же, как после `destroy()`.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
}

impl SessionHandle {
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Получает медиа, входит в комнату и (для врача) ждёт offer.
    /// Завершается, когда все ожидания выполнены.
    pub async fn start(&self) -> Result<MediaStream> {
        let ticket = self.request(|reply| Command::Start { reply }).await??;

        pending::outcome(ticket.entry).await?;
        if let Some(answer) = ticket.answer {
            pending::outcome(answer).await?;
        }
        Ok(ticket.stream)
    }

    /// Передаёт входящее сообщение; завершается после его обработки
    pub async fn dispatch(&self, message: InboundMessage) -> Result<()> {
        self.request(|done| Command::Inbound { message, done }).await
    }

    pub async fn change_device_state(&self, change: DeviceStateChange) -> Result<()> {
        self.request(|done| Command::ChangeDeviceState { change, done })
            .await
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.request(|done| Command::HangUp { done }).await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.request(|done| Command::Destroy { done }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}
