//! HTTP ingress for push notifications.
//!
//! Every delivery that passes authentication and decodes is answered `200`,
//! including duplicates and unknown accounts, so the push transport does
//! not retry it.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, error, warn};

use super::{PushNotification, WebhookAuthenticator, WebhookError};
use crate::service::{HealthReport, Ingested, SyncService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
    pub auth: Arc<WebhookAuthenticator>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub status: &'static str,
    pub notification_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookError::Forbidden(_) => StatusCode::FORBIDDEN,
            WebhookError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "webhook request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "webhook request rejected");
        }
        // Internal details stay in the log.
        let message = match &self {
            WebhookError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Routes: `POST {path}` for deliveries and `GET /healthz`.
pub fn router(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, post(receive))
        .route("/healthz", get(health))
        .with_state(state)
}

async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, WebhookError> {
    state.auth.authenticate(&headers).await?;

    let notification = PushNotification::from_body(&body)?;
    let notification_id = notification.id.clone();

    let ingested = state
        .service
        .handle_notification(notification)
        .map_err(|e| WebhookError::Internal(e.to_string()))?;

    let status = match ingested {
        Ingested::Queued => "queued",
        Ingested::Duplicate(_) => "duplicate",
        Ingested::Ignored => "ignored",
    };
    debug!(notification_id = %notification_id, status, "delivery acknowledged");

    Ok(Json(IngestResponse {
        status,
        notification_id,
    }))
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthReport>, WebhookError> {
    state
        .service
        .health()
        .map(Json)
        .map_err(|e| WebhookError::Internal(e.to_string()))
}
