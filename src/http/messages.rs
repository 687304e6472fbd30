//! Ingestion endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{AppError, AppResult, AppState};
use crate::gateway::{StreamStatus, Submission};
use crate::model::DomainMessage;

/// Body of `POST /api/messages`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub sender: String,
    #[serde(alias = "text")]
    pub body: String,
}

/// `GET /api/messages`
pub async fn list_messages(State(state): State<AppState>) -> AppResult<Json<Vec<DomainMessage>>> {
    let messages = state.gateway.list().await?;
    Ok(Json(messages))
}

/// `POST /api/messages`
///
/// 201 when the message is persisted and streamed, 202 when it is persisted
/// but the stream has not confirmed it.
pub async fn submit_message(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Submission>)> {
    state.ensure_running()?;

    let Json(request) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let submission = state.gateway.submit(&request.sender, &request.body).await?;

    let status = match submission.stream {
        StreamStatus::Delivered { .. } => StatusCode::CREATED,
        StreamStatus::Failed { .. } | StreamStatus::Unconfirmed => StatusCode::ACCEPTED,
    };
    Ok((status, Json(submission)))
}
