//! Периодический съём статистики соединения и расчёт битрейта.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::events::{EventBus, EventKind, EventPayload};
use crate::media::TrackKind;
use crate::peer::engine::{PeerEngine, QualityLimitation, StatsEntry, StatsReport};
use crate::session::DeviceInfo;
use crate::utils::now_millis;

pub const BITRATE_METRIC: &str = "bitrate";

/// Событие метрики: стабильное имя, произвольные данные, время съёма (мс)
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub name: String,
    pub data: Value,
    pub timestamp: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricInfo {
    pub client_id: String,
    pub consultation_id: String,
}

/// Счётчик байт одной медиалинии и время его съёма
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Counter {
    pub bytes: Option<u64>,
    /// миллисекунды
    pub timestamp: Option<f64>,
}

/// `round(8·Δbytes / Δseconds)`; нет данных хотя бы в одном замере - нет битрейта
pub fn calc_bitrate(prev: Counter, curr: Counter) -> Option<i64> {
    let (prev_bytes, prev_ts) = (prev.bytes?, prev.timestamp?);
    let (curr_bytes, curr_ts) = (curr.bytes?, curr.timestamp?);

    let seconds = (curr_ts - prev_ts) / 1000.0;
    if seconds == 0.0 {
        return Some(0);
    }
    let bytes = curr_bytes as f64 - prev_bytes as f64;
    Some((bytes * 8.0 / seconds).round() as i64)
}

/// Нужные поля одного отчёта getStats
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSample {
    pub out_video: Counter,
    pub out_audio: Counter,
    pub in_video: Counter,
    pub in_audio: Counter,
    pub quality_limitation: Option<QualityLimitation>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub frames_per_second: Option<f64>,
    pub available_outgoing_bitrate: Option<f64>,
}

impl StatsSample {
    pub fn from_report(report: &StatsReport) -> Self {
        let mut sample = StatsSample::default();
        let mut seen_pair = false;

        // берём первую запись каждого типа, как делает браузерный клиент
        for entry in &report.entries {
            match entry {
                StatsEntry::OutboundRtp {
                    kind,
                    bytes_sent,
                    timestamp,
                    quality_limitation,
                    frame_width,
                    frame_height,
                    frames_per_second,
                } => {
                    let slot = match kind {
                        TrackKind::Video => &mut sample.out_video,
                        TrackKind::Audio => &mut sample.out_audio,
                    };
                    if slot.bytes.is_some() {
                        continue;
                    }
                    *slot = Counter {
                        bytes: Some(*bytes_sent),
                        timestamp: Some(*timestamp),
                    };
                    if *kind == TrackKind::Video {
                        sample.quality_limitation = quality_limitation.clone();
                        sample.frame_width = *frame_width;
                        sample.frame_height = *frame_height;
                        sample.frames_per_second = *frames_per_second;
                    }
                }
                StatsEntry::InboundRtp {
                    kind,
                    bytes_received,
                    timestamp,
                } => {
                    let slot = match kind {
                        TrackKind::Video => &mut sample.in_video,
                        TrackKind::Audio => &mut sample.in_audio,
                    };
                    if slot.bytes.is_none() {
                        *slot = Counter {
                            bytes: Some(*bytes_received),
                            timestamp: Some(*timestamp),
                        };
                    }
                }
                StatsEntry::CandidatePair {
                    available_outgoing_bitrate,
                } => {
                    if !seen_pair {
                        seen_pair = true;
                        sample.available_outgoing_bitrate = *available_outgoing_bitrate;
                    }
                }
            }
        }

        sample
    }
}

/// Метрика битрейта: первый замер только запоминается
pub struct BitrateMetric {
    info: MetricInfo,
    device: watch::Receiver<DeviceInfo>,
    prev: Option<StatsSample>,
}

impl BitrateMetric {
    pub fn new(info: MetricInfo, device: watch::Receiver<DeviceInfo>) -> Self {
        Self {
            info,
            device,
            prev: None,
        }
    }

    pub fn sample(&mut self, report: &StatsReport, timestamp: i64) -> Option<MetricEvent> {
        let curr = StatsSample::from_report(report);
        let event = self
            .prev
            .as_ref()
            .map(|prev| self.build(prev, &curr, timestamp));
        self.prev = Some(curr);
        event
    }

    fn build(&self, prev: &StatsSample, curr: &StatsSample, timestamp: i64) -> MetricEvent {
        let device = self.device.borrow().clone();
        MetricEvent {
            name: BITRATE_METRIC.to_string(),
            data: json!({
                "info": self.info,
                "availableOutgoingBitrate": curr.available_outgoing_bitrate,
                "qualityLimitation": curr.quality_limitation,
                "deviceInfo": device,
                "resolution": {
                    "width": curr.frame_width,
                    "height": curr.frame_height,
                    "framesPerSecond": curr.frames_per_second,
                },
                "bitrate": {
                    "out": {
                        "video": calc_bitrate(prev.out_video, curr.out_video),
                        "audio": calc_bitrate(prev.out_audio, curr.out_audio),
                    },
                    "in": {
                        "video": calc_bitrate(prev.in_video, curr.in_video),
                        "audio": calc_bitrate(prev.in_audio, curr.in_audio),
                    },
                },
            }),
            timestamp,
        }
    }
}

/// Фоновая задача опроса getStats. Останавливается при закрытии
/// соединения, при `detach()` или при drop.
pub struct MetricsSampler {
    task: JoinHandle<()>,
}

impl MetricsSampler {
    pub fn attach(
        engine: Arc<dyn PeerEngine>,
        bus: EventBus,
        closing: Arc<AtomicBool>,
        mut metric: BitrateMetric,
        period: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            // первый опрос через период после подключения
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if closing.load(Ordering::SeqCst) {
                    debug!("connection closing, metrics sampler stopped");
                    break;
                }
                match engine.get_stats().await {
                    Ok(report) => {
                        if let Some(event) = metric.sample(&report, now_millis()) {
                            bus.emit(EventKind::SendMetric, EventPayload::Metric(event))
                                .await;
                        }
                    }
                    Err(err) => warn!("stats poll failed: {}", err),
                }
            }
        });
        Self { task }
    }

    pub fn detach(&self) {
        self.task.abort();
    }

    pub fn is_attached(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MetricsSampler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(bytes: u64, timestamp: f64) -> Counter {
        Counter {
            bytes: Some(bytes),
            timestamp: Some(timestamp),
        }
    }

    fn report(out_video: u64, in_audio: u64, at: f64) -> StatsReport {
        StatsReport {
            entries: vec![
                StatsEntry::OutboundRtp {
                    kind: TrackKind::Video,
                    bytes_sent: out_video,
                    timestamp: at,
                    quality_limitation: None,
                    frame_width: Some(640),
                    frame_height: Some(480),
                    frames_per_second: Some(30.0),
                },
                StatsEntry::InboundRtp {
                    kind: TrackKind::Audio,
                    bytes_received: in_audio,
                    timestamp: at,
                },
                StatsEntry::CandidatePair {
                    available_outgoing_bitrate: Some(1_500_000.0),
                },
                StatsEntry::CandidatePair {
                    available_outgoing_bitrate: Some(1.0),
                },
            ],
        }
    }

    #[test]
    fn bitrate_is_bits_per_second() {
        assert_eq!(calc_bitrate(counter(1_000, 0.0), counter(3_000, 2_000.0)), Some(8_000));
        assert_eq!(calc_bitrate(counter(0, 0.0), counter(1, 3_000.0)), Some(3));
        assert_eq!(calc_bitrate(counter(10, 5.0), counter(10, 5.0)), Some(0));
        assert_eq!(calc_bitrate(Counter::default(), counter(10, 5.0)), None);
    }

    #[test]
    fn first_sample_is_only_a_baseline() {
        let (_tx, rx) = watch::channel(DeviceInfo::default());
        let mut metric = BitrateMetric::new(MetricInfo::default(), rx);

        assert!(metric.sample(&report(0, 0, 1_000.0), 1).is_none());
        let event = metric.sample(&report(500, 250, 3_000.0), 2).unwrap();

        assert_eq!(event.name, "bitrate");
        assert_eq!(event.timestamp, 2);
        assert_eq!(event.data["bitrate"]["out"]["video"], 2_000);
        assert_eq!(event.data["bitrate"]["in"]["audio"], 1_000);
        assert!(event.data["bitrate"]["out"]["audio"].is_null());
        assert_eq!(event.data["availableOutgoingBitrate"], 1_500_000.0);
        assert_eq!(event.data["resolution"]["width"], 640);
    }

    #[test]
    fn device_info_is_read_at_sample_time() {
        let (tx, rx) = watch::channel(DeviceInfo::default());
        let mut metric = BitrateMetric::new(MetricInfo::default(), rx);
        metric.sample(&report(0, 0, 0.0), 0);

        tx.send_modify(|info| info.is_mute = true);
        let event = metric.sample(&report(0, 0, 2_000.0), 0).unwrap();
        assert_eq!(event.data["deviceInfo"]["isMute"], true);
    }
}
