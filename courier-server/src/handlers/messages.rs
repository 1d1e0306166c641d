use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use courier_model::Message;
use serde::{Deserialize, Serialize};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Deserialize)]
pub struct SubmitMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitMessageResponse {
    pub message: &'static str,
}

/// Buffer a message; `202` means queued, not yet stored.
pub async fn submit_message(
    State(state): State<AppState>,
    payload: Result<Json<SubmitMessageRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SubmitMessageResponse>)> {
    let Json(request) = payload?;
    state.writer.submit(Message::new(request.content))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitMessageResponse {
            message: "Message accepted",
        }),
    ))
}

/// Every persisted message, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Message>>> {
    let messages = state.writer.list_all().await?;
    Ok(Json(messages))
}
