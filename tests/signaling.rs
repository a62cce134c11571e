mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use consult_rtc::events::EventPayload;
use consult_rtc::peer::{EngineEvent, IceCandidate};
use consult_rtc::{
    forward_outbound, AuditLog, ChannelSink, EventBus, EventKind, OutboundEnvelope, Role,
};

use common::*;

fn wire(envelope: &OutboundEnvelope) -> Value {
    serde_json::from_str(&envelope.to_json().unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn initiator_handshake_reaches_the_transport_in_order() {
    let h = Harness::spawn(params(Role::Initiator));
    let (sink, mut rx) = ChannelSink::new();
    let _forwarding = forward_outbound(h.handle.bus(), Arc::new(sink));

    let start = h.start();
    settle().await;

    let available = wire(&rx.try_recv().unwrap());
    assert_eq!(available["type"], "rtc-available-event");
    assert_eq!(available["chatId"], "chat-1");
    assert_eq!(available["data"]["callType"], "video");
    assert!(available.get("connectionIds").is_none());

    let enter = wire(&rx.try_recv().unwrap());
    assert_eq!(
        enter,
        json!({
            "route": "vcm",
            "data": {
                "type": "enter",
                "sender": {"chatId": "chat-1", "clientId": "doctor-1"},
                "consultationId": "cons-1",
            }
        })
    );

    h.dispatch("enter", enter_ack("doctor-1", "conn-self")).await;
    h.dispatch("video-offer", sdp("offer", "remote-offer", "conn-visitor"))
        .await;
    start.await.unwrap().unwrap();

    let answer = wire(&rx.try_recv().unwrap());
    assert_eq!(answer["type"], "video-answer");
    assert_eq!(answer["connectionIds"], json!(["conn-visitor"]));
    assert_eq!(answer["data"]["sender"]["connectionId"], "conn-self");
    assert_eq!(
        answer["data"]["sdp"],
        json!({"type": "answer", "sdp": "answer-1"})
    );

    h.emit(1, EngineEvent::IceCandidate(IceCandidate::new("candidate:7")))
        .await;
    let update = wire(&rx.try_recv().unwrap());
    assert_eq!(update["type"], "new-ice-candidate");
    assert_eq!(update["connectionIds"], json!(["conn-visitor"]));
    assert_eq!(update["data"]["sdp"]["candidate"], "candidate:7");
    assert_eq!(update["data"]["sdp"]["sdpMLineIndex"], 0);
}

#[tokio::test(start_paused = true)]
async fn stopped_forwarding_sends_nothing() {
    let h = Harness::spawn(params(Role::Responder));
    let (sink, mut rx) = ChannelSink::new();
    forward_outbound(h.handle.bus(), Arc::new(sink)).stop();

    let start = h.start();
    settle().await;
    h.dispatch("enter", enter_ack("visitor-1", "conn-self")).await;
    start.await.unwrap().unwrap();

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn publish_without_subscribers_is_still_audited() {
    let audit = AuditLog::new();
    let bus = EventBus::with_audit(audit.clone());

    bus.emit(EventKind::HangUpReceive, EventPayload::Empty).await;

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, EventKind::HangUpReceive);
    assert_eq!(audit.session_events().len(), 1);
    assert!(audit.signaling_events().is_empty());
}
