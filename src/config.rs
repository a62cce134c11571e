// Конфигурация библиотеки
// Эхо журнала аудита в tracing можно отключить только в режиме разработки

use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки эхо журнала включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене записи только копятся в журнале

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения эха журнала в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// ========== TIMEOUTS ==========

/// Ожидание подтверждения входа в комнату, секунды
pub const ENTER_TIMEOUT_DEFAULT: u64 = 10;

/// Ожидание offer от посетителя, секунды
pub const ANSWER_TIMEOUT_DEFAULT: u64 = 120;

/// Сколько ждём инициализации камеры/микрофона
pub const MEDIA_TIMEOUT: Duration = Duration::from_secs(30);

/// Период опроса getStats
pub const METRICS_INTERVAL: Duration = Duration::from_secs(2);

/// ========== SIGNALING ==========

/// Маршрут широковещательных сообщений сервиса
pub const BROADCAST_ROUTE: &str = "vcm";

/// STUN по умолчанию, пока relay не прислал свой список
pub const DEFAULT_ICE_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];
