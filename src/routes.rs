use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{handlers, middleware_layer, state::AppState};

/// Builds the API router. Rate limiting and CORS are layered on in `main`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/sessions/{session_id}/token",
            post(handlers::tokens::issue_token)
                .get(handlers::tokens::token_status)
                .delete(handlers::tokens::revoke_token),
        )
        .route(
            "/api/sessions/{session_id}/attendance",
            get(handlers::attendance::session_attendance),
        )
        .route("/api/check-in", post(handlers::check_in::check_in))
        .route(
            "/api/attendance/history",
            get(handlers::attendance::attendance_history),
        )
        .route_layer(from_fn(middleware_layer::identity::require_identity))
        .with_state(state);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(api)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
}
