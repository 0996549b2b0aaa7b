//! HTTP surface of the agent runtime contract: `POST /invocations` and `GET /ping`.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use deepresearch_core::remote::SESSION_HEADER;
use deepresearch_core::{InvocationRequest, InvocationResponse, ResearchRuntime, SessionContext};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ResearchRuntime>,
    pub session_permits: Arc<Semaphore>,
    pub max_sessions: usize,
}

impl AppState {
    pub fn new(runtime: ResearchRuntime) -> Self {
        let max_sessions = runtime.config().max_concurrent_sessions.max(1);
        Self {
            runtime: Arc::new(runtime),
            session_permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handle_ping))
        .route("/invocations", post(handle_invocation))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

fn acquire_session_permit(state: &AppState) -> ApiResult<OwnedSemaphorePermit> {
    match state.session_permits.clone().try_acquire_owned() {
        Ok(permit) => Ok(permit),
        Err(TryAcquireError::NoPermits) => Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "session capacity reached; retry once a slot frees up",
        )),
        Err(TryAcquireError::Closed) => Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "invocation executor unavailable",
        )),
    }
}

#[derive(Debug, Serialize)]
struct PingResponse {
    status: &'static str,
}

async fn handle_ping() -> Json<PingResponse> {
    Json(PingResponse { status: "Healthy" })
}

fn parse_request(body: &[u8]) -> ApiResult<InvocationRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(InvocationRequest::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        warn!(error = %err, "rejecting malformed invocation payload");
        AppError::new(StatusCode::BAD_REQUEST, format!("invalid JSON payload: {err}"))
    })
}

fn session_context(headers: &HeaderMap) -> Option<SessionContext> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(SessionContext::with_session_id)
}

async fn handle_invocation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<InvocationResponse>> {
    let request = parse_request(&body)?;
    let _permit = acquire_session_permit(&state)?;

    let context = session_context(&headers);
    let response = state.runtime.invoke(request, context.as_ref()).await;
    info!(success = response.is_success(), "invocation finished");
    Ok(Json(response))
}
