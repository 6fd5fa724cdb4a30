//! `/mcp`: the session-routed JSON-RPC endpoint.
//!
//! The session id travels in the `mcp-session-id` header in both
//! directions.  Every response carries the id the request ended up bound
//! to, including freshly minted ones.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use sg_domain::error::Error;
use sg_protocol::{JsonRpcRequest, JsonRpcResponse, SESSION_HEADER};

use crate::router::RouteOutcome;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mcp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let session_id = session_header(&headers);

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let err = Error::InvalidRequest(format!("malformed JSON-RPC body: {e}"));
            return respond(RouteOutcome {
                session_id,
                status: err.http_status(),
                response: Some(JsonRpcResponse::from_result(None, Err(err))),
            });
        }
    };

    let method = request.method.clone();
    let outcome = state.router.dispatch(session_id.as_deref(), request).await;
    tracing::debug!(
        method = %method,
        session_id = outcome.session_id.as_deref().unwrap_or("-"),
        status = outcome.status,
        "mcp request"
    );
    respond(outcome)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /mcp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("missing {SESSION_HEADER} header") })),
        )
            .into_response();
    };

    match state.router.close_session(&session_id) {
        Ok(()) => with_session(
            (
                StatusCode::OK,
                Json(json!({ "closed": true, "sessionId": session_id })),
            )
                .into_response(),
            &session_id,
        ),
        Err(Error::SessionNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "session not found" })),
        )
            .into_response(),
        Err(e) => (
            status(e.http_status()),
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mcp/ping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn ping(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = session_header(&headers);
    let body = state.router.ping(session_id.as_deref());
    let response = Json(body).into_response();
    match session_id {
        Some(sid) => with_session(response, &sid),
        None => response,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn with_session(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn respond(outcome: RouteOutcome) -> Response {
    let code = status(outcome.status);
    let response = match outcome.response {
        Some(body) => (code, Json(body)).into_response(),
        None => code.into_response(),
    };
    match outcome.session_id {
        Some(sid) => with_session(response, &sid),
        None => response,
    }
}
