// Конфигурация движка
// Логирование по умолчанию включено только в режиме разработки

use crate::error::{Result, SessionError};
use crate::media::MediaConstraints;
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::env;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене только через PAIRLINK_LOG

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Переменная окружения с фильтром логов (синтаксис EnvFilter)
pub const LOG_ENV: &str = "PAIRLINK_LOG";

pub const STUN_SERVER_ENV: &str = "PAIRLINK_STUN_SERVER";
pub const TURN_SERVER_ENV: &str = "PAIRLINK_TURN_SERVER";
pub const TURN_USERNAME_ENV: &str = "PAIRLINK_TURN_USERNAME";
pub const TURN_PASSWORD_ENV: &str = "PAIRLINK_TURN_PASSWORD";

/// Размер пула кандидатов по умолчанию
pub const DEFAULT_CANDIDATE_POOL_SIZE: u8 = 10;

/// ICE серверы и параметры сбора кандидатов
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceConfig {
    pub servers: Vec<ServerConfig>,
    pub candidate_pool_size: u8,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: default_ice_servers(),
            candidate_pool_size: DEFAULT_CANDIDATE_POOL_SIZE,
        }
    }
}

impl IceConfig {
    /// TURN без логина/пароля и пустые URL недопустимы
    pub fn validate(&self) -> Result<()> {
        for server in &self.servers {
            if server.url.is_empty() {
                return Err(SessionError::Config(format!(
                    "server {} has an empty URL",
                    server.id
                )));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(SessionError::Config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

/// Полная конфигурация сессии
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub ice: IceConfig,
    pub media: MediaConstraints,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig::default(),
            media: MediaConstraints::default(),
            log_level: DEFAULT_LOG_LEVEL.into(),
        }
    }
}

impl EngineConfig {
    /// Дефолты + переопределения из окружения
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup(STUN_SERVER_ENV).filter(|u| !u.is_empty()) {
            config.ice.servers = vec![ServerConfig {
                id: "env-stun".into(),
                r#type: "stun".into(),
                url,
                username: None,
                credential: None,
            }];
        }

        if let Some(url) = lookup(TURN_SERVER_ENV).filter(|u| !u.is_empty()) {
            config.ice.servers.push(ServerConfig {
                id: "env-turn".into(),
                r#type: "turn".into(),
                url,
                username: lookup(TURN_USERNAME_ENV),
                credential: lookup(TURN_PASSWORD_ENV),
            });
        }

        config.ice.validate()?;
        Ok(config)
    }
}

/// Публичные STUN серверы Google
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
