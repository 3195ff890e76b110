use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Extension,
    Json,
};

use crate::{
    error::Result,
    handlers::response::json,
    middleware_layer::identity::Identity,
    services::check_in::CheckInRequest,
    state::AppState,
};

/// Verifies and records a student check-in.
///
/// Every verdict, accepted or not, is a 200 with the verdict in the body.
#[axum::debug_handler]
pub async fn check_in(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CheckInRequest>,
) -> Result<Response> {
    let response = state.coordinator.check_in(identity.user_id, req).await?;
    json(StatusCode::OK, &response)
}
