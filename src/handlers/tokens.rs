use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    handlers::response::json,
    middleware_layer::identity::Identity,
    models::session::{ClassSession, SessionStatus},
    repositories::attempts::AttemptLedger,
    state::AppState,
};

/// The query parameters for issuing a token.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenQuery {
    /// Overrides the configured rotation interval, in seconds.
    #[serde(default)]
    pub rotation_seconds: Option<u64>,
}

/// Loads a session and checks that `identity` is its lecturer.
pub(crate) async fn owned_session(
    ledger: &dyn AttemptLedger,
    session_id: Uuid,
    identity: &Identity,
) -> Result<ClassSession> {
    let session = ledger
        .find_session(session_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if session.lecturer_id != identity.user_id {
        tracing::warn!(
            "❌ User {} is not the lecturer of session {}",
            identity.user_id,
            session_id
        );
        return Err(AppError::Unauthorized);
    }

    Ok(session)
}

/// Issues (rotates) the QR token for a session.
#[axum::debug_handler]
pub async fn issue_token(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<IssueTokenQuery>,
) -> Result<Response> {
    let session = owned_session(state.ledger.as_ref(), session_id, &identity).await?;

    if matches!(session.status, SessionStatus::Ended | SessionStatus::Cancelled) {
        return Err(AppError::Validation(
            "Session is no longer accepting check-ins".to_string(),
        ));
    }

    let issued = state.tokens.issue(session_id, query.rotation_seconds).await?;
    json(StatusCode::CREATED, &issued)
}

/// Reports whether a session has a current token.
#[axum::debug_handler]
pub async fn token_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    owned_session(state.ledger.as_ref(), session_id, &identity).await?;

    let status = state.tokens.status(session_id).await?;
    json(StatusCode::OK, &status)
}

/// Retires the current token for a session.
#[axum::debug_handler]
pub async fn revoke_token(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    owned_session(state.ledger.as_ref(), session_id, &identity).await?;

    state.tokens.revoke(session_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
