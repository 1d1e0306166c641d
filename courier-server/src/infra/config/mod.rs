//! Layered configuration: command line, environment (with `.env`), TOML
//! file, then built-in defaults.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    BroadcastSettings, Config, ConfigMetadata, CorsConfig, ServerConfig,
    StoreBackend, StoreConfig, WriterSettings,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
