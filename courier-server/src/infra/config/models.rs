use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use courier_core::{broadcast::BroadcastConfig, writer::WriterConfig};

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub writer: WriterSettings,
    pub broadcast: BroadcastSettings,
    pub cors: CorsConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// HTTP API port.
    pub port: u16,
    /// WebSocket subscriber port.
    pub ws_port: u16,
}

impl ServerConfig {
    pub fn http_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.socket_addr(self.port)
    }

    pub fn ws_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.socket_addr(self.ws_port)
    }

    fn socket_addr(
        &self,
        port: u16,
    ) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip: IpAddr = self.host.parse()?;
        Ok(SocketAddr::new(ip, port))
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Which message store a `store.url` selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres(String),
    Memory,
}

impl StoreConfig {
    pub const MEMORY_URL: &'static str = "memory://";

    /// `None` when the scheme is not one the server can open.
    pub fn backend(&self) -> Option<StoreBackend> {
        let url = self.url.trim();
        if url == Self::MEMORY_URL {
            return Some(StoreBackend::Memory);
        }
        let parsed = url::Url::parse(url).ok()?;
        match parsed.scheme() {
            "postgres" | "postgresql" => {
                Some(StoreBackend::Postgres(url.to_string()))
            }
            "memory" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_retry_attempts: u32,
    pub base_retry_delay: Duration,
    pub max_content_length: usize,
    pub recovery_snapshot_path: PathBuf,
}

impl WriterSettings {
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            batch_size: self.batch_size,
            batch_timeout: self.batch_timeout,
            max_retry_attempts: self.max_retry_attempts,
            base_retry_delay: self.base_retry_delay,
            max_content_length: self.max_content_length,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub heartbeat_interval: Duration,
    /// Frames buffered per WebSocket before sends start failing.
    pub outbound_buffer: usize,
}

impl BroadcastSettings {
    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
