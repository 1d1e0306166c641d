#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum_test::TestServer;
use courier_core::store::{MemoryMessageStore, MessageStore};
use courier_server::{
    AppState,
    infra::{
        config::{ConfigLoad, ConfigLoader, sources::EnvConfig},
        startup::Services,
    },
    routes,
};
use tempfile::TempDir;

pub struct TestApp {
    pub api: TestServer,
    pub ws: TestServer,
    pub state: AppState,
    pub services: Services,
    pub store: Arc<MemoryMessageStore>,
    pub dir: TempDir,
}

pub async fn spawn_app(batch_size: usize) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("pending-messages.json");
    let vars: HashMap<String, String> = [
        ("DATABASE_URL", "memory://".to_string()),
        ("BATCH_SIZE", batch_size.to_string()),
        ("BATCH_TIMEOUT", "50ms".to_string()),
        ("MAX_CONTENT_LENGTH", "64".to_string()),
        ("SERVER_PORT", "0".to_string()),
        ("WS_PORT", "1".to_string()),
        (
            "RECOVERY_SNAPSHOT_PATH",
            snapshot.to_string_lossy().into_owned(),
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let ConfigLoad { config, .. } = ConfigLoader::new()
        .load_with_env(EnvConfig::from_lookup(|name| vars.get(name).cloned()))
        .unwrap();
    let config = Arc::new(config);

    let store = Arc::new(MemoryMessageStore::new());
    let services = Services::start(&config, store.clone() as Arc<dyn MessageStore>)
        .await
        .unwrap();
    let state = AppState::new(
        Arc::clone(&config),
        services.writer.clone(),
        services.broadcaster.clone(),
    );

    let api = TestServer::builder()
        .http_transport()
        .build(routes::create_api_router(state.clone()))
        .unwrap();
    let ws = TestServer::builder()
        .http_transport()
        .build(routes::create_ws_router(state.clone()))
        .unwrap();

    TestApp {
        api,
        ws,
        state,
        services,
        store,
        dir,
    }
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
