//! Конверты сигнальных сообщений.
//!
//! Исходящие бывают широковещательные (`publish`, маршрут `vcm`) и адресные
//! (`transient`, опционально с `connectionIds`). Все они штампуются
//! отправителем из параметров сессии. Входящие разбираются в [`Signal`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::BROADCAST_ROUTE;
use crate::error::CodecError;
use crate::events::EventKind;
use crate::peer::types::{IceCandidate, IceServer, SessionDescription};
use crate::session::SessionParams;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub chat_id: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl Sender {
    pub fn from_params(params: &SessionParams) -> Self {
        Self {
            chat_id: params.chat_id.clone(),
            client_id: params.client_id.clone(),
            connection_id: params.connection_id.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastData {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: Sender,
    pub consultation_id: String,
}

/// `{route: "vcm", data: {type, sender, consultationId}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub route: String,
    pub data: BroadcastData,
}

/// `{type, chatId, data: {...body, sender, consultationId}, connectionIds?}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectedMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub chat_id: String,
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_ids: Option<Vec<String>>,
}

impl DirectedMessage {
    pub fn target(&self) -> Option<&str> {
        self.connection_ids
            .as_ref()
            .and_then(|ids| ids.first())
            .map(String::as_str)
    }
}

pub fn build_broadcast_message(params: &SessionParams, kind: EventKind) -> BroadcastMessage {
    BroadcastMessage {
        route: BROADCAST_ROUTE.to_string(),
        data: BroadcastData {
            kind: kind.wire_name().to_string(),
            sender: Sender::from_params(params),
            consultation_id: params.consultation_id.clone(),
        },
    }
}

/// Адресное сообщение. Пустой или отсутствующий `target` значит "всем в чате".
pub fn build_directed_message<B: Serialize>(
    params: &SessionParams,
    target: Option<&str>,
    body: &B,
) -> Result<DirectedMessage, CodecError> {
    let Value::Object(mut data) = serde_json::to_value(body)? else {
        return Err(CodecError::BodyNotObject);
    };

    let kind = data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    data.insert(
        "sender".into(),
        serde_json::to_value(Sender::from_params(params))?,
    );
    data.insert(
        "consultationId".into(),
        Value::String(params.consultation_id.clone()),
    );

    Ok(DirectedMessage {
        kind,
        chat_id: params.chat_id.clone(),
        data,
        connection_ids: target
            .filter(|id| !id.is_empty())
            .map(|id| vec![id.to_string()]),
    })
}

/// ========== BODIES ==========

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SdpBody<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sdp: &'a SessionDescription,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CandidateBody<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sdp: &'a IceCandidate,
}

/// ========== INBOUND ==========

/// Сообщение от relay: `{type, data, chatId, clientId}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl InboundMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            chat_id: None,
            client_id: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Сигнальный вид события, если тип известен
    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::from_signal_name(&self.kind)
    }

    pub fn parse(&self) -> Result<Signal, CodecError> {
        let signal = match self.event_kind() {
            Some(EventKind::Enter) => Signal::EnterAck(self.payload()?),
            Some(EventKind::VideoOffer) => Signal::Offer(self.payload()?),
            Some(EventKind::VideoAnswer) => Signal::Answer(self.payload()?),
            Some(EventKind::SendProps) => Signal::Properties(self.data.clone()),
            Some(EventKind::NewIceCandidate) => Signal::IceCandidate(self.payload()?),
            Some(EventKind::HangUp) => Signal::HangUp,
            _ => Signal::Unknown(self.kind.clone()),
        };
        Ok(signal)
    }

    /// Разбор с логированием; битые сообщения отбрасываются
    pub fn signal(&self) -> Option<Signal> {
        match self.parse() {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!(kind = %self.kind, "dropping inbound message: {}", err);
                None
            }
        }
    }

    fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_value(self.data.clone()).map_err(|source| CodecError::Malformed {
            kind: self.kind.clone(),
            source,
        })
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EnterData {
    pub sender: Sender,
    #[serde(default)]
    pub iceservers: Vec<IceServer>,
    #[serde(default)]
    pub visitortype: Option<Value>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SdpData {
    pub sdp: SessionDescription,
    pub sender: Sender,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CandidateData {
    pub sdp: IceCandidate,
    #[serde(default)]
    pub sender: Option<Sender>,
}

/// Разобранное входящее сообщение
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    EnterAck(EnterData),
    Offer(SdpData),
    Answer(SdpData),
    Properties(Value),
    IceCandidate(CandidateData),
    HangUp,
    Unknown(String),
}
