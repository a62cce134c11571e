use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Relay иногда присылает адреса без схемы; добавляем её по наличию учётных данных
pub fn add_ice_url_scheme(url: &str, has_credentials: bool) -> String {
    if url.starts_with("turn:") || url.starts_with("turns:") || url.starts_with("stun:") {
        url.to_string()
    } else {
        let scheme = if has_credentials { "turn:" } else { "stun:" };
        format!("{}{}", scheme, url)
    }
}

/// Миллисекунды с эпохи, как `timestamp` в отчётах браузерного getStats
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_added_only_when_missing() {
        assert_eq!(
            add_ice_url_scheme("stun:stun.example.org:3478", false),
            "stun:stun.example.org:3478"
        );
        assert_eq!(
            add_ice_url_scheme("relay.example.org:443", true),
            "turn:relay.example.org:443"
        );
        assert_eq!(
            add_ice_url_scheme("stun.example.org", false),
            "stun:stun.example.org"
        );
    }

    #[test]
    fn random_ids_are_hex() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
