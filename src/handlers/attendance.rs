use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Extension,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::Result,
    handlers::{response::json, tokens::owned_session},
    middleware_layer::identity::Identity,
    state::AppState,
    validation::check_in::validate_page,
};

/// The query parameters for listing attempt history.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Attendance roll-up for a session, for its lecturer.
#[axum::debug_handler]
pub async fn session_attendance(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    owned_session(state.ledger.as_ref(), session_id, &identity).await?;

    let summary = state.ledger.summarize(session_id).await?;
    json(StatusCode::OK, &summary)
}

/// The caller's own check-in attempts, newest first.
#[axum::debug_handler]
pub async fn attendance_history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response> {
    let (limit, offset) = validate_page(query.limit, query.offset)?;

    let attempts = state.ledger.history(identity.user_id, limit, offset).await?;
    json(StatusCode::OK, &attempts)
}
