use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::events::{Event, EventBus, EventKind, EventPayload, HandlerId};
use crate::logger::log;
use crate::messages::{BroadcastMessage, DirectedMessage};

/// Исходящие сигнальные события, которые нужно отдать транспорту
pub const OUTBOUND_KINDS: [EventKind; 7] = [
    EventKind::Enter,
    EventKind::AvailableEvent,
    EventKind::IceCandidateUpdate,
    EventKind::SendProps,
    EventKind::VideoOffer,
    EventKind::VideoAnswer,
    EventKind::HangUp,
];

/// Транспорт до relay. Вызывается синхронно из обработчика шины,
/// поэтому реализация должна только ставить сообщение в очередь.
pub trait SignalingSink: Send + Sync {
    /// `publish`: широковещательное сообщение сервису
    fn send_broadcast(&self, message: &BroadcastMessage);
    /// `transient`: адресное сообщение в чат
    fn send_directed(&self, message: &DirectedMessage);
}

/// Конверт в том виде, в каком он уходит в сокет
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OutboundEnvelope {
    Broadcast(BroadcastMessage),
    Directed(DirectedMessage),
}

impl OutboundEnvelope {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Sink поверх канала: транспорт читает конверты из receiver
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutboundEnvelope>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SignalingSink for ChannelSink {
    fn send_broadcast(&self, message: &BroadcastMessage) {
        if self.tx.send(OutboundEnvelope::Broadcast(message.clone())).is_err() {
            log("Signaling transport is gone, dropping broadcast");
        }
    }

    fn send_directed(&self, message: &DirectedMessage) {
        if self.tx.send(OutboundEnvelope::Directed(message.clone())).is_err() {
            log("Signaling transport is gone, dropping directed message");
        }
    }
}

/// Подписки, пересылающие исходящие события в транспорт
pub struct Forwarding {
    bus: EventBus,
    handlers: Vec<(EventKind, HandlerId)>,
}

impl Forwarding {
    pub fn stop(self) {
        for (kind, id) in &self.handlers {
            self.bus.unsubscribe(*kind, *id);
        }
    }
}

pub fn forward_outbound(bus: &EventBus, sink: Arc<dyn SignalingSink>) -> Forwarding {
    let handlers = OUTBOUND_KINDS
        .into_iter()
        .map(|kind| {
            let sink = sink.clone();
            let id = bus.subscribe(kind, move |event: &Event| match &event.payload {
                EventPayload::Broadcast(message) => sink.send_broadcast(message),
                EventPayload::Directed(message) => sink.send_directed(message),
                other => log(&format!(
                    "Outbound {} without an envelope: {:?}",
                    event.kind, other
                )),
            });
            (kind, id)
        })
        .collect();

    Forwarding {
        bus: bus.clone(),
        handlers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::AuditLog;
    use crate::messages::build_broadcast_message;
    use crate::session::SessionParams;

    #[tokio::test]
    async fn outbound_events_reach_the_sink() {
        let bus = EventBus::with_audit(AuditLog::new());
        let (sink, mut rx) = ChannelSink::new();
        let forwarding = forward_outbound(&bus, Arc::new(sink));

        let message = build_broadcast_message(&SessionParams::default(), EventKind::Enter);
        bus.emit(EventKind::Enter, EventPayload::Broadcast(message.clone()))
            .await;
        bus.emit(EventKind::SendMetric, EventPayload::Empty).await;

        assert_eq!(rx.try_recv().unwrap(), OutboundEnvelope::Broadcast(message));
        assert!(rx.try_recv().is_err());

        forwarding.stop();
        assert_eq!(bus.subscriber_count(EventKind::Enter), 0);
    }

    #[test]
    fn envelope_serializes_without_wrapper() {
        let message = build_broadcast_message(&SessionParams::default(), EventKind::HangUp);
        let json = OutboundEnvelope::Broadcast(message).to_json().unwrap();
        assert!(json.starts_with(r#"{"route":"vcm""#));
    }
}
