use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::events::{EventCategory, EventKind};

/// Логирование через tracing с учётом флагов конфигурации
pub fn log(msg: &str) {
    if logging_enabled() {
        tracing::debug!("{}", msg);
    }
}

fn logging_enabled() -> bool {
    // В режиме разработки дополнительно проверяем dev::ENABLE_LOGGING
    crate::config::LOGGING_ENABLED && crate::config::dev::ENABLE_LOGGING
}

/// ========== AUDIT ==========

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub direction: Direction,
    pub event: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Журнал входящих и исходящих событий, только на добавление.
/// Клоны пишут в один и тот же журнал.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

static AUDIT: Lazy<AuditLog> = Lazy::new(AuditLog::new);

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Общий журнал процесса
    pub fn global() -> AuditLog {
        AUDIT.clone()
    }

    pub fn append(&self, direction: Direction, event: EventKind, payload: serde_json::Value) {
        let record = AuditRecord {
            direction,
            event,
            payload,
            timestamp: Utc::now(),
        };
        if logging_enabled() {
            tracing::debug!(
                target: "consult_rtc::audit",
                direction = ?record.direction,
                event = %record.event,
                at = %record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                "{}",
                record.payload
            );
        }
        self.lock().push(record);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().clone()
    }

    /// Забирает накопленные записи и очищает журнал
    pub fn drain(&self) -> Vec<AuditRecord> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn by_category(&self, category: EventCategory) -> Vec<AuditRecord> {
        self.lock()
            .iter()
            .filter(|r| r.event.category() == category)
            .cloned()
            .collect()
    }

    pub fn signaling_events(&self) -> Vec<AuditRecord> {
        self.by_category(EventCategory::Signaling)
    }

    pub fn connection_events(&self) -> Vec<AuditRecord> {
        self.by_category(EventCategory::Connection)
    }

    pub fn session_events(&self) -> Vec<AuditRecord> {
        self.by_category(EventCategory::Session)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
