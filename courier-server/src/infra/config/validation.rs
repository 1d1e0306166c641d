use thiserror::Error;

use super::models::{Config, StoreBackend};

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("DATABASE_URL (store.url) must be set; use memory:// for a non-durable store")]
    MissingStoreUrl,
    #[error("unsupported store URL '{url}'; expected postgres://, postgresql://, or memory://")]
    UnsupportedStoreUrl { url: String },
    #[error("{field} must be at least 1")]
    ZeroValue { field: &'static str },
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("HTTP port and WebSocket port are both {port}")]
    PortCollision { port: u16 },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    match config.store.backend() {
        Some(StoreBackend::Postgres(_)) => {}
        Some(StoreBackend::Memory) => warnings.push_with_hint(
            "store.url is memory://; persisted messages are lost on restart",
            "Set DATABASE_URL to a postgres:// URL for durable storage",
        ),
        None => {
            return Err(ConfigGuardRailError::UnsupportedStoreUrl {
                url: redact_credentials(&config.store.url),
            });
        }
    }

    if config.store.max_connections == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "DATABASE_MAX_CONNECTIONS",
        });
    }

    let writer = &config.writer;
    if writer.batch_size == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "BATCH_SIZE",
        });
    }
    if writer.batch_timeout.is_zero() {
        return Err(ConfigGuardRailError::ZeroDuration {
            field: "BATCH_TIMEOUT",
        });
    }
    if writer.max_content_length == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "MAX_CONTENT_LENGTH",
        });
    }
    if writer.max_retry_attempts == 0 {
        warnings.push_with_hint(
            "MAX_RETRY_ATTEMPTS is 0; the first failed flush is reported as exhausted",
            "Allow a few retries so transient store outages recover on their own",
        );
    } else if writer.base_retry_delay.is_zero() {
        warnings.push("BASE_RETRY_DELAY is 0; failed flushes retry immediately");
    }

    let broadcast = &config.broadcast;
    if broadcast.heartbeat_interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroDuration {
            field: "HEARTBEAT_INTERVAL",
        });
    }
    if broadcast.outbound_buffer == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "WS_OUTBOUND_BUFFER",
        });
    }

    if config.server.port == config.server.ws_port {
        return Err(ConfigGuardRailError::PortCollision {
            port: config.server.port,
        });
    }

    Ok(warnings)
}

/// Drop any password before a URL ends up in an error or a log line.
pub fn redact_credentials(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => raw.to_string(),
    }
}
