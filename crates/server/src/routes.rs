use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use navigator_agent::{Orchestrator, TurnReply, TurnRequest};
use navigator_core::domain::session::{CloseReason, Session, SessionId};
use navigator_core::errors::{ApplicationError, InterfaceError};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    #[serde(default)]
    pub session_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CloseResponse {
    pub session_id: SessionId,
    pub closed: bool,
    pub close_reason: Option<CloseReason>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: &'static str,
    pub correlation_id: String,
}

type Rejection = (StatusCode, Json<ApiError>);

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/v1/turns", post(post_turn))
        .route("/api/v1/sessions/{session_id}", get(get_session))
        .route("/api/v1/sessions/{session_id}/close", post(close_session))
        .with_state(ApiState { orchestrator })
}

async fn post_turn(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnReply>, Rejection> {
    let correlation_id = correlation_id(&headers);
    info!(
        event_name = "api.turn.received",
        correlation_id = %correlation_id,
        session_id = body.session_id.as_deref().unwrap_or("new"),
        "turn request received"
    );

    let request = TurnRequest::new(body.session_id.map(SessionId), body.text)
        .with_correlation_id(correlation_id.clone());
    match state.orchestrator.handle_turn(request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(error) => Err(reject(error, &correlation_id)),
    }
}

/// Session state for inspection. Private originals are never serialized.
async fn get_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, Rejection> {
    let correlation_id = correlation_id(&headers);
    state
        .orchestrator
        .session_snapshot(&SessionId(session_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn close_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<CloseResponse>, Rejection> {
    let correlation_id = correlation_id(&headers);
    let session = state
        .orchestrator
        .close_session(&SessionId(session_id), &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id))?;

    Ok(Json(CloseResponse {
        closed: session.is_closed(),
        session_id: session.id,
        close_reason: session.close_reason,
        closed_at: session.closed_at,
    }))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

fn reject(error: ApplicationError, correlation_id: &str) -> Rejection {
    let interface = error.into_interface(correlation_id);
    let (status, code) = match &interface {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    warn!(
        event_name = "api.request.rejected",
        correlation_id = %correlation_id,
        status = status.as_u16(),
        error = %interface,
        "request rejected"
    );

    (
        status,
        Json(ApiError {
            error: code,
            message: interface.user_message(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use navigator_agent::tools::{demo_registry, RetryPolicy};
    use navigator_agent::{
        AgentRegistry, Orchestrator, OrchestratorSettings, SafetyGate, ToolGateway,
    };

    use super::{router, CORRELATION_HEADER};

    fn app() -> Router {
        let tools =
            ToolGateway::new(demo_registry(), RetryPolicy::default(), Duration::from_secs(1), 1);
        let orchestrator = Orchestrator::new(
            AgentRegistry::with_builtin(),
            tools,
            SafetyGate::default(),
            OrchestratorSettings::default(),
        );
        router(Arc::new(orchestrator))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(CORRELATION_HEADER, "req-test")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn first_turn_opens_a_session_and_answers() {
        let app = app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/turns",
                json!({ "text": "I want to find a detox center near Atlanta, GA" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["session_id"].as_str().is_some_and(|id| id.starts_with("sess-")));
        assert!(body["reply"].as_str().unwrap_or_default().contains("Peachtree Recovery Center"));
        assert_eq!(body["closed"], false);
        assert_eq!(body["agent"], "facility_search");
    }

    #[tokio::test]
    async fn session_inspection_never_exposes_private_originals() {
        let app = app();
        let (_, opened) = send(
            &app,
            post_json(
                "/api/v1/turns",
                json!({
                    "text": "My name is Jane Doe, phone 555-111-2222, I need outpatient care"
                }),
            ),
        )
        .await;
        let session_id = opened["session_id"].as_str().expect("session id").to_string();

        let (status, session) = send(&app, get(&format!("/api/v1/sessions/{session_id}"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["phase"], "awaiting_input");
        assert_eq!(session["turns"].as_array().map(Vec::len), Some(1));
        assert_eq!(
            session["turns"][0]["user_text"],
            "My name is [REDACTED], phone [REDACTED], I need outpatient care"
        );
        let raw = session.to_string();
        assert!(!raw.contains("Jane Doe"));
        assert!(!raw.contains("555-111-2222"));
    }

    #[tokio::test]
    async fn closed_sessions_answer_with_conflict() {
        let app = app();
        let (_, opened) =
            send(&app, post_json("/api/v1/turns", json!({ "text": "I need help with treatment" })))
                .await;
        let session_id = opened["session_id"].as_str().expect("session id").to_string();

        let (status, closed) = send(
            &app,
            post_json(&format!("/api/v1/sessions/{session_id}/close"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(closed["closed"], true);
        assert_eq!(closed["close_reason"], "explicit");

        let (status, body) = send(
            &app,
            post_json("/api/v1/turns", json!({ "session_id": session_id, "text": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["correlation_id"], "req-test");
    }

    #[tokio::test]
    async fn unknown_sessions_and_blank_text_are_client_errors() {
        let app = app();

        let (status, body) = send(&app, get("/api/v1/sessions/sess-missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = send(
            &app,
            post_json("/api/v1/turns", json!({ "session_id": "sess-missing", "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, post_json("/api/v1/turns", json!({ "text": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        let (status, _) = send(&app, post_json("/api/v1/turns", json!({ "message": "hi" }))).await;
        assert!(status.is_client_error());
    }
}
