use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::DateTime;
use async_trait::async_trait;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use presence::cache::{MemoryTokenStore, StoredToken, TokenStore};
use presence::clock::ManualClock;
use presence::config::PresenceConfig;
use presence::error::{AppError, Result};
use presence::models::session::{ClassSession, SessionStatus};
use presence::repositories::memory::MemoryAttemptLedger;
use presence::routes::build_router;
use presence::state::AppState;

const T0: i64 = 1_700_000_000;
const LAT: f64 = 51.5074;
const LNG: f64 = -0.1278;

/// A token cache that times out on every call.
struct TimedOutTokenStore;

#[async_trait]
impl TokenStore for TimedOutTokenStore {
    async fn get(&self, _session_id: Uuid) -> Result<Option<StoredToken>> {
        Err(AppError::Cache("timed out".to_string()))
    }

    async fn set(&self, _token: &StoredToken, _ttl: std::time::Duration) -> Result<()> {
        Err(AppError::Cache("timed out".to_string()))
    }

    async fn delete(&self, _session_id: Uuid) -> Result<()> {
        Err(AppError::Cache("timed out".to_string()))
    }
}

struct TestContext {
    app: Router,
    clock: ManualClock,
    session: ClassSession,
}

impl TestContext {
    async fn new() -> Self {
        let clock = ManualClock::at(T0);
        let store = Arc::new(MemoryTokenStore::new(Arc::new(clock.clone())));
        Self::with_store(clock, store).await
    }

    async fn with_store(clock: ManualClock, store: Arc<dyn TokenStore>) -> Self {
        let ledger = MemoryAttemptLedger::new();
        let session = ClassSession {
            id: Uuid::new_v4(),
            lecturer_id: Uuid::new_v4(),
            latitude: LAT,
            longitude: LNG,
            geofence_radius_meters: Some(50.0),
            status: SessionStatus::Active,
            starts_at: DateTime::from_timestamp(T0 - 60, 0).unwrap(),
            ends_at: None,
        };
        ledger.insert_session(session.clone()).await;

        let state = AppState::from_parts(
            PresenceConfig::new(b"http-test-secret".to_vec()),
            store,
            Arc::new(ledger),
            Arc::new(clock.clone()),
        );

        Self {
            app: build_router(state),
            clock,
            session,
        }
    }

    async fn send(&self, method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    fn token_uri(&self) -> String {
        format!("/api/sessions/{}/token", self.session.id)
    }

    async fn issue(&self) -> String {
        let (status, body) = self
            .send(Method::POST, &self.token_uri(), Some(self.session.lecturer_id), None)
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["qrPayload"].as_str().unwrap().to_string()
    }

    async fn check_in(&self, student: Uuid, qr: &str, fingerprint: &str) -> (StatusCode, Value) {
        let body = json!({
            "sessionId": self.session.id,
            "presentedToken": qr,
            "latitude": LAT,
            "longitude": LNG,
            "fingerprint": fingerprint,
        });
        self.send(Method::POST, "/api/check-in", Some(student), Some(body)).await
    }
}

#[tokio::test]
async fn requests_without_identity_are_forbidden() {
    let ctx = TestContext::new().await;
    let (status, _) = ctx.send(Method::POST, &ctx.token_uri(), None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn only_the_lecturer_manages_tokens() {
    let ctx = TestContext::new().await;

    let (status, _) = ctx
        .send(Method::POST, &ctx.token_uri(), Some(Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let unknown = format!("/api/sessions/{}/token", Uuid::new_v4());
    let (status, _) = ctx
        .send(Method::POST, &unknown, Some(ctx.session.lecturer_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = ctx
        .send(Method::POST, &ctx.token_uri(), Some(ctx.session.lecturer_id), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["issuedAt"], T0);
    assert_eq!(body["expiresAt"], T0 + 45);
    let payload = body["qrPayload"].as_str().unwrap();
    assert!(payload.starts_with(&ctx.session.id.to_string()));
    assert_eq!(payload.split('|').count(), 3);
}

#[tokio::test]
async fn rotation_interval_outside_bounds_is_rejected() {
    let ctx = TestContext::new().await;
    let uri = format!("{}?rotationSeconds=10", ctx.token_uri());
    let (status, body) = ctx
        .send(Method::POST, &uri, Some(ctx.session.lecturer_id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("between 30 and 60"));
}

#[tokio::test]
async fn check_in_round_trip() {
    let ctx = TestContext::new().await;
    let qr = ctx.issue().await;
    let student = Uuid::new_v4();

    ctx.clock.advance(10);
    let (status, body) = ctx.check_in(student, &qr, "device-a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["verdict"], "success");
    assert_eq!(body["distanceMeters"], 0);
    assert_eq!(body["anomaly"]["suspicious"], false);
    assert_eq!(body["anomaly"]["studentCount"], 0);
    assert!(body["attemptId"].is_string());

    ctx.clock.set(T0 + 200);
    let (status, body) = ctx.check_in(student, &qr, "device-a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["verdict"], "expired_token");
    assert!(body["distanceMeters"].is_null());

    let (status, history) = ctx
        .send(Method::GET, "/api/attendance/history?limit=10", Some(student), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["verdict"], "expired_token");
    assert_eq!(history[1]["verdict"], "success");
}

#[tokio::test]
async fn lecturer_sees_attendance_summary() {
    let ctx = TestContext::new().await;
    let qr = ctx.issue().await;

    ctx.check_in(Uuid::new_v4(), &qr, "device-a").await;
    ctx.check_in(Uuid::new_v4(), &qr, "device-a").await;
    ctx.check_in(Uuid::new_v4(), &qr, "device-b").await;

    let uri = format!("/api/sessions/{}/attendance", ctx.session.id);
    let (status, _) = ctx.send(Method::GET, &uri, Some(Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, summary) = ctx
        .send(Method::GET, &uri, Some(ctx.session.lecturer_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["totalAttempts"], 3);
    assert_eq!(summary["studentsPresent"], 2);
    assert_eq!(summary["byVerdict"]["success"], 2);
    assert_eq!(summary["byVerdict"]["spoofed"], 1);
}

#[tokio::test]
async fn revoked_token_stops_check_ins() {
    let ctx = TestContext::new().await;
    let qr = ctx.issue().await;
    let lecturer = Some(ctx.session.lecturer_id);

    let (status, body) = ctx.send(Method::GET, &ctx.token_uri(), lecturer, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);

    let (status, _) = ctx.send(Method::DELETE, &ctx.token_uri(), lecturer, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = ctx.send(Method::GET, &ctx.token_uri(), lecturer, None).await;
    assert_eq!(body["active"], false);

    let (_, body) = ctx.check_in(Uuid::new_v4(), &qr, "device-a").await;
    assert_eq!(body["verdict"], "expired_token");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let ctx = TestContext::new().await;
    let (status, _) = ctx
        .send(
            Method::POST,
            "/api/check-in",
            Some(Uuid::new_v4()),
            Some(json!({ "sessionId": ctx.session.id, "presentedToken": "" , "latitude": 0.0, "longitude": 0.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cache_outage_returns_service_unavailable() {
    let ctx = TestContext::with_store(ManualClock::at(T0), Arc::new(TimedOutTokenStore)).await;
    let qr = format!("{}|{}|{}", ctx.session.id, T0, "0".repeat(64));

    let (status, body) = ctx.check_in(Uuid::new_v4(), &qr, "device-a").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Cache unavailable");

    let (status, _) = ctx
        .send(Method::POST, &ctx.token_uri(), Some(ctx.session.lecturer_id), None)
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
