use serde::Serialize;
use thiserror::Error;

/// Причина сбоя медиаустройств
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaErrorReason {
    DeviceNotFound,
    Security,
    PermissionDenied,
    StreamEnded,
    Timeout,
    Other,
}

impl MediaErrorReason {
    /// Классификация по имени ошибки device API
    pub fn from_error_name(name: &str) -> Self {
        match name {
            "NotFoundError" => Self::DeviceNotFound,
            "SecurityError" => Self::Security,
            "PermissionDeniedError" => Self::PermissionDenied,
            "StreamEnded" => Self::StreamEnded,
            "Timeout" => Self::Timeout,
            _ => Self::Other,
        }
    }

    /// Человекочитаемое описание; есть только у причин, о которых стоит сказать пользователю
    pub fn description(self) -> Option<&'static str> {
        match self {
            Self::DeviceNotFound => Some("Camera and/or microphone not found"),
            Self::Security => Some("Media device security error (camera and/or microphone)"),
            Self::PermissionDenied => Some("Access to camera and/or microphone denied"),
            _ => None,
        }
    }
}

/// Ошибка, которую возвращает device API (аналог DOMException: имя + сообщение)
#[derive(Debug, Clone, Error)]
#[error("{name}: {message}")]
pub struct DeviceFailure {
    pub name: String,
    pub message: String,
}

impl DeviceFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Media device error: {message}")]
pub struct MediaError {
    pub reason: MediaErrorReason,
    pub message: String,
    pub description: Option<String>,
}

impl MediaError {
    pub fn new(reason: MediaErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            description: reason.description().map(str::to_owned),
        }
    }
}

impl From<DeviceFailure> for MediaError {
    fn from(failure: DeviceFailure) -> Self {
        MediaError::new(MediaErrorReason::from_error_name(&failure.name), failure.message)
    }
}

/// Сбои движка peer-connection. Никогда не фатальны для сессии.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to create peer connection: {0}")]
    Create(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("failed to apply ICE candidate: {0}")]
    Candidate(String),

    #[error("failed to add track: {0}")]
    Track(String),

    #[error("data channel error: {0}")]
    DataChannel(String),

    #[error("stats unavailable: {0}")]
    Stats(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message body must be a JSON object")]
    BodyNotObject,

    #[error("malformed `{kind}` payload: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Ошибки, видимые вызывающему `start()`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Failed entering")]
    EnteringTimedOut,

    #[error("Failed answer")]
    AnswerTimedOut,

    #[error("pending handshake cancelled by teardown")]
    Cancelled,

    #[error("session task is gone")]
    Closed,
}

impl SessionError {
    /// Код ошибки, который ожидает веб-клиент (`streamError` | `enter` | `answer`)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Media(_) => "streamError",
            Self::EnteringTimedOut => "enter",
            Self::AnswerTimedOut => "answer",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_failure_names_map_to_reasons() {
        let err: MediaError = DeviceFailure::new("NotFoundError", "no devices").into();
        assert_eq!(err.reason, MediaErrorReason::DeviceNotFound);
        assert_eq!(
            err.description.as_deref(),
            Some("Camera and/or microphone not found")
        );

        let err: MediaError = DeviceFailure::new("PermissionDeniedError", "denied").into();
        assert_eq!(err.reason, MediaErrorReason::PermissionDenied);

        let err: MediaError = DeviceFailure::new("AbortError", "whatever").into();
        assert_eq!(err.reason, MediaErrorReason::Other);
        assert!(err.description.is_none());
    }

    #[test]
    fn session_error_kinds_match_client_codes() {
        let media = SessionError::Media(MediaError::new(MediaErrorReason::Timeout, "slow"));
        assert_eq!(media.kind(), "streamError");
        assert_eq!(SessionError::EnteringTimedOut.kind(), "enter");
        assert_eq!(SessionError::AnswerTimedOut.kind(), "answer");
        assert_eq!(SessionError::EnteringTimedOut.to_string(), "Failed entering");
    }
}
