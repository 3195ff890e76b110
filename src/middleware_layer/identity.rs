use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Header the upstream login layer sets once it has authenticated the caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
}

/// Reads the caller id from the request headers.
fn extract_user_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}

/// A middleware that requires a caller identity to be present.
///
/// # Arguments
///
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `StatusCode`.
pub async fn require_identity(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let user_id = extract_user_id(request.headers()).ok_or_else(|| {
        tracing::warn!("❌ Missing or malformed {} header", USER_ID_HEADER);
        StatusCode::FORBIDDEN
    })?;

    tracing::debug!("✅ Caller identified: {}", user_id);

    request.extensions_mut().insert(Identity { user_id });

    Ok(next.run(request).await)
}
