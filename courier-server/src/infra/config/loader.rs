use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, time::Duration};
use thiserror::Error;

use super::{
    models::{
        BroadcastSettings, Config, ConfigMetadata, CorsConfig, ServerConfig,
        StoreConfig, WriterSettings,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("courier.toml"),
        PathBuf::from("config/courier.toml"),
    ]
});

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_WS_PORT: u16 = 3002;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_CONTENT_LENGTH: usize = 10_000;
const DEFAULT_SNAPSHOT_PATH: &str = "data/pending-messages.json";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Loader inputs that come from the command line. Each one wins over the
/// environment and the config file.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub ws_port: Option<u16>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, read the process environment, and compose.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Compose from an already gathered environment. Skips `.env`.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            self.compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No courier.toml detected; using environment variables and defaults",
                "Create courier.toml or pass --config to pin settings in a file",
            );
        }

        let FileConfig {
            server: file_server,
            store: file_store,
            writer: file_writer,
            broadcast: file_broadcast,
            cors: file_cors,
        } = file_config.unwrap_or_default();

        let server = ServerConfig {
            host: self
                .options
                .server_host
                .clone()
                .or(env.server_host)
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self
                .options
                .server_port
                .or(env.server_port)
                .or(file_server.port)
                .unwrap_or(DEFAULT_PORT),
            ws_port: self
                .options
                .ws_port
                .or(env.ws_port)
                .or(file_server.ws_port)
                .unwrap_or(DEFAULT_WS_PORT),
        };

        let store = StoreConfig {
            url: env
                .database_url
                .or(file_store.url.filter(|url| !url.trim().is_empty()))
                .ok_or(ConfigGuardRailError::MissingStoreUrl)?,
            max_connections: env
                .database_max_connections
                .or(file_store.max_connections)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };

        let writer = WriterSettings {
            batch_size: env
                .batch_size
                .or(file_writer.batch_size)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            batch_timeout: resolve_duration(
                "BATCH_TIMEOUT",
                env.batch_timeout,
                file_writer.batch_timeout,
                DEFAULT_BATCH_TIMEOUT,
            )?,
            max_retry_attempts: env
                .max_retry_attempts
                .or(file_writer.max_retry_attempts)
                .unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS),
            base_retry_delay: resolve_duration(
                "BASE_RETRY_DELAY",
                env.base_retry_delay,
                file_writer.base_retry_delay,
                DEFAULT_BASE_RETRY_DELAY,
            )?,
            max_content_length: env
                .max_content_length
                .or(file_writer.max_content_length)
                .unwrap_or(DEFAULT_MAX_CONTENT_LENGTH),
            recovery_snapshot_path: env
                .recovery_snapshot_path
                .or(file_writer.recovery_snapshot_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
        };

        let broadcast = BroadcastSettings {
            heartbeat_interval: resolve_duration(
                "HEARTBEAT_INTERVAL",
                env.heartbeat_interval,
                file_broadcast.heartbeat_interval,
                DEFAULT_HEARTBEAT_INTERVAL,
            )?,
            outbound_buffer: env
                .outbound_buffer
                .or(file_broadcast.outbound_buffer)
                .unwrap_or(DEFAULT_OUTBOUND_BUFFER),
        };

        let cors = CorsConfig {
            allowed_origins: env
                .cors_allowed_origins
                .or(file_cors.allowed_origins)
                .filter(|origins| !origins.is_empty())
                .unwrap_or_else(|| vec!["*".to_string()]),
        };

        let config = Config {
            server,
            store,
            writer,
            broadcast,
            cors,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
            },
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok((config, warnings))
    }
}

fn resolve_duration(
    field: &'static str,
    env_value: Option<String>,
    file_value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env_value.or(file_value) {
        Some(raw) => humantime::parse_duration(raw.trim()).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value: raw,
                source,
            }
        }),
        None => Ok(default),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
