use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_ICE_URLS;
use crate::utils::add_ice_url_scheme;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Описание сессии в форме `RTCSessionDescriptionInit`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE кандидат в форме `RTCIceCandidateInit`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

/// `urls` в RTCIceServer бывает строкой или массивом
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

/// Конфигурация ICE сервера, как её присылает relay
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }

    /// Все адреса сервера со схемой протокола
    pub fn normalized_urls(&self) -> Vec<String> {
        let has_credentials = self.username.is_some() && self.credential.is_some();
        let raw: Vec<&str> = match &self.urls {
            IceUrls::One(url) => vec![url.as_str()],
            IceUrls::Many(urls) => urls.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .filter(|url| !url.is_empty())
            .map(|url| add_ice_url_scheme(url, has_credentials))
            .collect()
    }
}

/// Конфигурация для создания peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_URLS.iter().map(|url| IceServer::stun(*url)).collect(),
        }
    }
}

/// Удалённый участник, к которому ведёт соединение
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub client_id: String,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    Inviter,
    Invitee,
}

/// Снимок соединения для подписчиков шины
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub seq: u64,
    pub connection_id: Option<String>,
    pub member: Member,
    pub role: ConnectionRole,
    pub is_closing: bool,
}

/// Описание удалённого трека из `ontrack`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: crate::media::TrackKind,
}

/// Сообщение data-channel, текстовое или бинарное
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(bytes::Bytes),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_server_accepts_both_url_shapes() {
        let one: IceServer = serde_json::from_str(r#"{"urls":"stun:a.example:3478"}"#).unwrap();
        assert_eq!(one.normalized_urls(), vec!["stun:a.example:3478"]);

        let many: IceServer = serde_json::from_str(
            r#"{"urls":["b.example:3478","turns:c.example:443"],"username":"u","credential":"p"}"#,
        )
        .unwrap();
        assert_eq!(
            many.normalized_urls(),
            vec!["turn:b.example:3478", "turns:c.example:443"]
        );
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let json = serde_json::to_value(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9 typ host"))
            .unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json.get("usernameFragment").is_none());
    }

    #[test]
    fn description_serializes_type_field() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0"}));
    }
}
