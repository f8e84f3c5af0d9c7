// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::ConfigError;
use crate::media::MediaConstraints;
use crate::peer::types::{IceServerKind, ServerConfig};
use crate::signaling::WireFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Настройки звонка
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    /// Искусственная задержка loopback-сигналинга
    pub signaling_delay_ms: u64,
    pub wire_format: WireFormat,
    pub media: MediaConstraints,
    /// Сколько удалённых кандидатов держим до установки remote description
    pub max_pending_candidates: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            signaling_delay_ms: 100,
            wire_format: WireFormat::Json,
            media: MediaConstraints::default(),
            max_pending_candidates: 64,
        }
    }
}

/// Публичные STUN-серверы Google
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

impl CallConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Проверяет список ICE серверов
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ice_servers.is_empty() {
            return Err(ConfigError::NoServers);
        }

        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::InvalidServer {
                    id: server.id.clone(),
                    reason: "server URL cannot be empty",
                });
            }

            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::InvalidServer {
                    id: server.id.clone(),
                    reason: "TURN servers require username and credential",
                });
            }
        }
        Ok(())
    }

    pub fn signaling_delay(&self) -> Duration {
        Duration::from_millis(self.signaling_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.media.audio && config.media.video);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = CallConfig::from_json_str(r#"{"signaling_delay_ms": 5}"#).unwrap();
        assert_eq!(config.signaling_delay(), Duration::from_millis(5));
        assert_eq!(config.max_pending_candidates, 64);
        assert_eq!(config.ice_servers[0].url, "stun:stun.l.google.com:19302");
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let raw = r#"{"ice_servers": [{"id": "relay", "type": "turn", "url": "relay.example.org:3478"}]}"#;
        match CallConfig::from_json_str(raw) {
            Err(ConfigError::InvalidServer { id, .. }) => assert_eq!(id, "relay"),
            other => panic!("expected InvalidServer, got {other:?}"),
        }
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let err = CallConfig::from_json_str(r#"{"ice_servers": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::NoServers));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"wire_format": "token", "ice_servers": [{{"id": "a", "type": "stun", "url": "stun.example.org:3478"}}]}}"#
        )
        .unwrap();

        let config = CallConfig::load(file.path()).unwrap();
        assert_eq!(config.wire_format, WireFormat::Token);
        assert_eq!(config.ice_servers[0].id, "a");
    }
}
