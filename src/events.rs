//! Типизированная шина событий.
//!
//! Набор событий закрыт ([`EventKind`]). Подписка по виду события плюс
//! отдельный список [`EventKind::All`], который вызывается после обработчиков
//! конкретного вида. Каждая публикация сначала пишется в журнал аудита.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::logger::{AuditLog, Direction};
use crate::messages::{BroadcastMessage, DirectedMessage};
use crate::metrics::MetricEvent;
use crate::peer::state::IceConnectionState;
use crate::peer::types::{ConnectionInfo, RemoteTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // сигнальные сообщения
    Enter,
    GetVisitors,
    ActiveVisitors,
    IceCandidateUpdate,
    AvailableEvent,
    SendProps,
    VideoOffer,
    VideoAnswer,
    NewIceCandidate,
    HangUp,
    // соединение
    ConnectionClose,
    ConnectionNew,
    ConnectionIceState,
    ConnectionTrack,
    // сессия
    All,
    HangUpReceive,
    RespondentProps,
    SendMetric,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Signaling,
    Connection,
    Session,
}

impl EventKind {
    pub const SIGNALING: [EventKind; 10] = [
        Self::Enter,
        Self::GetVisitors,
        Self::ActiveVisitors,
        Self::IceCandidateUpdate,
        Self::AvailableEvent,
        Self::SendProps,
        Self::VideoOffer,
        Self::VideoAnswer,
        Self::NewIceCandidate,
        Self::HangUp,
    ];

    /// Имя события, как его видит веб-клиент и relay
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::GetVisitors => "getvisitors",
            Self::ActiveVisitors => "activvisitors",
            Self::IceCandidateUpdate => "iceCandidateUpdate",
            Self::AvailableEvent => "availableEvent",
            Self::SendProps => "rtc-send-props",
            Self::VideoOffer => "video-offer",
            Self::VideoAnswer => "video-answer",
            Self::NewIceCandidate => "new-ice-candidate",
            Self::HangUp => "hangup",
            Self::ConnectionClose => "connectionCloseEvent",
            Self::ConnectionNew => "connectionNewEvent",
            Self::ConnectionIceState => "connectionIceStateEvent",
            Self::ConnectionTrack => "connectionTrackEvent",
            Self::All => "allEvent",
            Self::HangUpReceive => "hangUpReceiveEvent",
            Self::RespondentProps => "rtcRespondentPropsEvent",
            Self::SendMetric => "sendMetricEvent",
        }
    }

    /// Сигнальный вид события по имени входящего сообщения
    pub fn from_signal_name(name: &str) -> Option<Self> {
        Self::SIGNALING.into_iter().find(|kind| kind.wire_name() == name)
    }

    pub fn category(self) -> EventCategory {
        match self {
            Self::Enter
            | Self::GetVisitors
            | Self::ActiveVisitors
            | Self::IceCandidateUpdate
            | Self::AvailableEvent
            | Self::SendProps
            | Self::VideoOffer
            | Self::VideoAnswer
            | Self::NewIceCandidate
            | Self::HangUp => EventCategory::Signaling,
            Self::ConnectionClose
            | Self::ConnectionNew
            | Self::ConnectionIceState
            | Self::ConnectionTrack => EventCategory::Connection,
            Self::All | Self::HangUpReceive | Self::RespondentProps | Self::SendMetric => {
                EventCategory::Session
            }
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Event,
    Error,
}

/// Полезная нагрузка события. Форма определяется видом события.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    Broadcast(BroadcastMessage),
    Directed(DirectedMessage),
    Connection(ConnectionInfo),
    IceState {
        connection: ConnectionInfo,
        state: IceConnectionState,
    },
    Track(RemoteTrack),
    Properties(serde_json::Value),
    Metric(MetricEvent),
}

impl EventPayload {
    pub fn as_directed(&self) -> Option<&DirectedMessage> {
        match self {
            Self::Directed(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_broadcast(&self) -> Option<&BroadcastMessage> {
        match self {
            Self::Broadcast(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricEvent> {
        match self {
            Self::Metric(metric) => Some(metric),
            _ => None,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub severity: Severity,
    pub kind: EventKind,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct BusInner {
    handlers: Mutex<HashMap<EventKind, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
    audit: AuditLog,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Шина, пишущая в общий журнал процесса ([`AuditLog::global`]).
    /// Этот журнал живёт до конца процесса и сам не очищается: хосту с
    /// множеством сессий нужно периодически забирать записи через
    /// [`AuditLog::drain`] или передавать свой журнал в [`EventBus::with_audit`].
    pub fn new() -> Self {
        Self::with_audit(AuditLog::global())
    }

    pub fn with_audit(audit: AuditLog) -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(EventKind::All, Vec::new());
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(handlers),
                next_id: AtomicU64::new(1),
                audit,
            }),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Подписка на все события
    pub fn subscribe_all<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::All, handler)
    }

    pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        list.len() != before
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Публикация: запись аудита, затем обработчики вида, затем `All`.
    /// Завершается, когда все обработчики отработали.
    pub async fn publish(&self, kind: EventKind, payload: EventPayload, severity: Severity) {
        self.dispatch(Event {
            severity,
            kind,
            payload,
        });
    }

    pub async fn emit(&self, kind: EventKind, payload: EventPayload) {
        self.publish(kind, payload, Severity::Event).await;
    }

    /// Публикация в отдельной задаче; порядок относительно вызывающего не гарантирован
    pub fn publish_detached(&self, kind: EventKind, payload: EventPayload) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move { bus.emit(kind, payload).await })
    }

    fn dispatch(&self, event: Event) {
        self.inner
            .audit
            .append(Direction::Out, event.kind, event.payload.to_value());

        // список копируется, чтобы обработчик мог подписываться/отписываться
        let (own, wildcard) = {
            let mut handlers = self.lock();
            let own: Vec<Handler> = handlers
                .entry(event.kind)
                .or_default()
                .iter()
                .map(|(_, h)| h.clone())
                .collect();
            let wildcard: Vec<Handler> = if event.kind == EventKind::All {
                Vec::new()
            } else {
                handlers
                    .get(&EventKind::All)
                    .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default()
            };
            (own, wildcard)
        };

        for handler in own.iter().chain(wildcard.iter()) {
            handler(&event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<(HandlerId, Handler)>>> {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &EventBus, kind: EventKind, tag: &'static str, seen: &Arc<Mutex<Vec<String>>>) -> HandlerId {
        let seen = seen.clone();
        bus.subscribe(kind, move |event| {
            seen.lock().unwrap().push(format!("{tag}:{}", event.kind));
        })
    }

    #[tokio::test]
    async fn kind_handlers_run_before_wildcard_in_registration_order() {
        let bus = EventBus::with_audit(AuditLog::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        recorder(&bus, EventKind::All, "any", &seen);
        recorder(&bus, EventKind::HangUpReceive, "first", &seen);
        recorder(&bus, EventKind::HangUpReceive, "second", &seen);

        bus.emit(EventKind::HangUpReceive, EventPayload::Empty).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "first:hangUpReceiveEvent",
                "second:hangUpReceiveEvent",
                "any:hangUpReceiveEvent"
            ]
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_audits() {
        let audit = AuditLog::new();
        let bus = EventBus::with_audit(audit.clone());

        bus.publish(EventKind::SendMetric, EventPayload::Empty, Severity::Event)
            .await;

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Out);
        assert_eq!(records[0].event, EventKind::SendMetric);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_handler() {
        let bus = EventBus::with_audit(AuditLog::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = recorder(&bus, EventKind::ConnectionNew, "a", &seen);
        recorder(&bus, EventKind::ConnectionNew, "b", &seen);

        assert!(bus.unsubscribe(EventKind::ConnectionNew, a));
        assert!(!bus.unsubscribe(EventKind::ConnectionNew, a));
        assert!(!bus.unsubscribe(EventKind::SendProps, a));

        bus.emit(EventKind::ConnectionNew, EventPayload::Empty).await;
        assert_eq!(*seen.lock().unwrap(), vec!["b:connectionNewEvent"]);
    }

    #[tokio::test]
    async fn wildcard_event_is_not_delivered_twice() {
        let bus = EventBus::with_audit(AuditLog::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        recorder(&bus, EventKind::All, "any", &seen);

        bus.emit(EventKind::All, EventPayload::Empty).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detached_publish_eventually_runs() {
        let bus = EventBus::with_audit(AuditLog::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        recorder(&bus, EventKind::SendProps, "props", &seen);

        bus.publish_detached(EventKind::SendProps, EventPayload::Empty)
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn signal_names_resolve_to_signaling_kinds() {
        assert_eq!(
            EventKind::from_signal_name("video-offer"),
            Some(EventKind::VideoOffer)
        );
        assert_eq!(EventKind::from_signal_name("allEvent"), None);
        assert_eq!(EventKind::SendMetric.category(), EventCategory::Session);
        assert_eq!(EventKind::ConnectionTrack.category(), EventCategory::Connection);
    }
}
