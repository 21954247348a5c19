use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Unix-время в секундах для меток сообщений
pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:", "turns:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_added_by_type() {
        assert_eq!(add_ice_url_scheme(&server("stun", "1.2.3.4:3478")), "stun:1.2.3.4:3478");
        assert_eq!(add_ice_url_scheme(&server("turn", "1.2.3.4:3478")), "turn:1.2.3.4:3478");
    }

    #[test]
    fn existing_scheme_kept() {
        assert_eq!(
            add_ice_url_scheme(&server("turn", "stun:example.org")),
            "stun:example.org"
        );
    }

    #[test]
    fn random_id_is_16_hex_digits() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }
}
