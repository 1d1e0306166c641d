use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub store: FileStoreConfig,
    #[serde(default)]
    pub writer: FileWriterConfig,
    #[serde(default)]
    pub broadcast: FileBroadcastConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// Durations are humantime strings such as `"1s"` or `"250ms"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWriterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_retry_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBroadcastConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_buffer: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub batch_size: Option<usize>,
    pub batch_timeout: Option<String>,
    pub max_retry_attempts: Option<u32>,
    pub base_retry_delay: Option<String>,
    pub max_content_length: Option<usize>,
    pub recovery_snapshot_path: Option<PathBuf>,
    pub heartbeat_interval: Option<String>,
    pub outbound_buffer: Option<usize>,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `gather` reads the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        let mut env_config = Self::default();

        env_config.config_path = var("COURIER_CONFIG").map(PathBuf::from);
        env_config.server_host = var("SERVER_HOST");
        env_config.server_port =
            var("SERVER_PORT").and_then(|s| s.trim().parse().ok());
        env_config.ws_port = var("WS_PORT").and_then(|s| s.trim().parse().ok());
        env_config.database_url = var("DATABASE_URL");
        env_config.database_max_connections =
            var("DATABASE_MAX_CONNECTIONS").and_then(|s| s.trim().parse().ok());

        env_config.batch_size =
            var("BATCH_SIZE").and_then(|s| s.trim().parse().ok());
        env_config.batch_timeout = var("BATCH_TIMEOUT");
        env_config.max_retry_attempts =
            var("MAX_RETRY_ATTEMPTS").and_then(|s| s.trim().parse().ok());
        env_config.base_retry_delay = var("BASE_RETRY_DELAY");
        env_config.max_content_length =
            var("MAX_CONTENT_LENGTH").and_then(|s| s.trim().parse().ok());
        env_config.recovery_snapshot_path =
            var("RECOVERY_SNAPSHOT_PATH").map(PathBuf::from);

        env_config.heartbeat_interval = var("HEARTBEAT_INTERVAL");
        env_config.outbound_buffer =
            var("WS_OUTBOUND_BUFFER").and_then(|s| s.trim().parse().ok());

        env_config.cors_allowed_origins =
            var("CORS_ALLOWED_ORIGINS").map(|raw| parse_csv(&raw));

        env_config
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
