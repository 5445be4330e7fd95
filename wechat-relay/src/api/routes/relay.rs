//! Relay routes: push, test, status and on/off switches.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{DeliveryResponse, SendRequest, ToggleResponse};
use crate::api::server::AppState;
use crate::error::Error;
use crate::status::RelayStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send", post(send))
        .route("/test", get(test))
        .route("/status", get(status))
        .route("/status.md", get(status_page))
        .route("/enable", post(enable))
        .route("/disable", post(disable))
}

/// Push `{title, content}` to every configured recipient.
async fn send(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DeliveryResponse>)> {
    if !state.relay.is_enabled() {
        return Err(Error::Disabled.into());
    }

    let Json(request) =
        payload.map_err(|e| ApiError::bad_request(format!("invalid request: {}", e.body_text())))?;
    request
        .validate()
        .map_err(|e| ApiError::bad_request(format!("invalid request: {e}")))?;

    let report = state.relay.send(&request.title, &request.content).await?;
    let (status, body) = DeliveryResponse::from_report(report, "send");
    Ok((status, Json(body)))
}

/// Push the canned test message to every configured recipient.
async fn test(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<DeliveryResponse>)> {
    let report = state.relay.test().await?;
    let (status, body) = DeliveryResponse::from_report(report, "test");
    Ok((status, Json(body)))
}

async fn status(State(state): State<AppState>) -> Json<RelayStatus> {
    Json(state.relay.status().await)
}

/// Markdown status page. Usage links point back at the host the request was
/// sent to.
async fn status_page(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let base_url = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_default();

    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        state.relay.display(&base_url).await,
    )
}

async fn enable(State(state): State<AppState>) -> ApiResult<Json<ToggleResponse>> {
    state.relay.enable().await?;
    info!("Relay enabled through the API");
    Ok(Json(ToggleResponse { enabled: true }))
}

async fn disable(State(state): State<AppState>) -> ApiResult<Json<ToggleResponse>> {
    state.relay.disable().await?;
    info!("Relay disabled through the API");
    Ok(Json(ToggleResponse { enabled: false }))
}
