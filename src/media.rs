//! Локальный медиапоток: получение, кэш, запасной поток с canvas.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MEDIA_TIMEOUT;
use crate::error::{DeviceFailure, MediaError};
use crate::utils::random_id;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Live,
    Ended,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    ended: AtomicBool,
}

/// Локальный трек. Клоны разделяют состояние `enabled`/`readyState`.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_id(random_id(), kind, label)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.inner.ended.load(Ordering::SeqCst) {
            ReadyState::Ended
        } else {
            ReadyState::Live
        }
    }

    pub fn stop(&self) {
        self.inner.ended.store(true, Ordering::SeqCst);
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("enabled", &self.enabled())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: random_id(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// ========== DEVICE API ==========

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// `getUserMedia({video, audio})`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

/// Какие устройства нашлись при получении потока
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAvailability {
    pub has_camera: bool,
    pub has_microphone: bool,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, DeviceFailure>;
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, DeviceFailure>;
    fn create_canvas(&self) -> Result<Arc<dyn CaptureCanvas>, DeviceFailure>;
}

/// Off-screen canvas, с которого снимается запасной видеопоток
pub trait CaptureCanvas: Send + Sync {
    fn capture_stream(&self) -> MediaStream;
}

/// ========== CONTROLLER ==========

pub struct MediaController {
    devices: Arc<dyn MediaDevices>,
    timeout: Duration,
    value: Option<MediaStream>,
    list: Vec<MediaStream>,
    availability: DeviceAvailability,
    // canvas создаётся один раз и переиспользуется для всех запасных потоков
    canvas: Option<Arc<dyn CaptureCanvas>>,
}

impl MediaController {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self::with_timeout(devices, MEDIA_TIMEOUT)
    }

    pub fn with_timeout(devices: Arc<dyn MediaDevices>, timeout: Duration) -> Self {
        Self {
            devices,
            timeout,
            value: None,
            list: Vec::new(),
            availability: DeviceAvailability::default(),
            canvas: None,
        }
    }

    pub fn current(&self) -> Option<&MediaStream> {
        self.value.as_ref()
    }

    pub fn availability(&self) -> DeviceAvailability {
        self.availability
    }

    /// Получает поток; повторные вызовы возвращают закэшированный
    pub async fn acquire(&mut self) -> Result<(MediaStream, DeviceAvailability), MediaError> {
        if let Some(stream) = &self.value {
            return Ok((stream.clone(), self.availability));
        }

        match self.init_local_stream().await {
            Ok(stream) => {
                info!(
                    stream = %stream.id(),
                    tracks = stream.tracks().len(),
                    "local media stream acquired"
                );
                self.value = Some(stream.clone());
                self.list.push(stream.clone());
                Ok((stream, self.availability))
            }
            Err(failure) => {
                let err = MediaError::from(failure);
                warn!(reason = ?err.reason, "media acquisition failed: {}", err.message);
                Err(err)
            }
        }
    }

    /// Останавливает все когда-либо полученные потоки
    pub fn stop_all_tracks(&mut self) {
        for stream in &self.list {
            stream.stop();
        }
        debug!(streams = self.list.len(), "stopped all local tracks");
        self.value = None;
        self.list.clear();
    }

    async fn init_local_stream(&mut self) -> Result<MediaStream, DeviceFailure> {
        let devices = self.devices.enumerate_devices().await?;
        let availability = DeviceAvailability {
            has_camera: devices.iter().any(|d| d.kind == DeviceKind::VideoInput),
            has_microphone: devices.iter().any(|d| d.kind == DeviceKind::AudioInput),
        };
        self.availability = availability;

        let timeout = self.timeout;
        let stream = match tokio::time::timeout(timeout, self.create_stream(availability)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DeviceFailure::new(
                    "Timeout",
                    format!(
                        "Failed to initialize media devices within {} seconds",
                        timeout.as_secs()
                    ),
                ))
            }
        };

        if let Some(track) = stream.video_tracks().next() {
            if track.ready_state() == ReadyState::Ended {
                return Err(DeviceFailure::new("StreamEnded", "Camera initialization failed"));
            }
        }

        Ok(stream)
    }

    async fn create_stream(&mut self, availability: DeviceAvailability) -> Result<MediaStream, DeviceFailure> {
        let mut stream = if availability.has_camera || availability.has_microphone {
            self.devices
                .get_user_media(MediaConstraints {
                    video: availability.has_camera,
                    audio: availability.has_microphone,
                })
                .await?
        } else {
            debug!("no capture devices, using canvas stream");
            self.fallback_stream()?
        };

        // дальше по коду всегда предполагается хотя бы один видеотрек
        if stream.video_tracks().next().is_none() {
            let fake = self.fallback_stream()?;
            let Some(track) = fake.video_tracks().next().cloned() else {
                return Err(DeviceFailure::new(
                    "StreamEnded",
                    "Canvas capture produced no video track",
                ));
            };
            stream.add_track(track);
        }

        Ok(stream)
    }

    fn fallback_stream(&mut self) -> Result<MediaStream, DeviceFailure> {
        let canvas = match &self.canvas {
            Some(canvas) => canvas.clone(),
            None => {
                let canvas = self.devices.create_canvas()?;
                self.canvas = Some(canvas.clone());
                canvas
            }
        };
        Ok(canvas.capture_stream())
    }
}
