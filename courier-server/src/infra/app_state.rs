use std::{fmt, sync::Arc};

use courier_core::{broadcast::Broadcaster, writer::BufferedWriter};

use crate::infra::config::Config;

/// Shared by the HTTP router and the WebSocket router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub writer: BufferedWriter,
    pub broadcaster: Broadcaster,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("writer", &self.writer.stats())
            .field("broadcaster", &self.broadcaster.stats())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        writer: BufferedWriter,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            config,
            writer,
            broadcaster,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
