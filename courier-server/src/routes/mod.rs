use axum::{
    Router,
    http::{Method, header},
    routing::get,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{messages, stats},
    infra::{app_state::AppState, config::CorsConfig, websocket},
};

/// HTTP API served on `server.port`.
pub fn create_api_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config().cors);

    Router::new()
        .route(
            "/messages",
            get(messages::list_messages).post(messages::submit_message),
        )
        .route("/stats", get(stats::stats))
        .route("/health", get(stats::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Subscriber endpoint served on `server.ws_port`.
pub fn create_ws_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket::subscribe_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let allow_origin = if config.is_wildcard_included() {
        AllowOrigin::any()
    } else {
        let origins: Vec<header::HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| header::HeaderValue::from_str(origin).ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
