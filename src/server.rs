//! HTTP surface: alert ingestion, queue status and on-demand jobs.
//!
//! | Method | Path              | Purpose                                   |
//! |--------|-------------------|-------------------------------------------|
//! | POST   | `/alerts`         | Accept an alert and file it by cluster    |
//! | GET    | `/alerts`         | Endpoint description                      |
//! | GET    | `/alerts/status`  | Queue status snapshot                     |
//! | POST   | `/jobs/inspect`   | Start a cluster inspection                |
//! | POST   | `/jobs/analyze`   | Start an alarm analysis on request        |
//! | POST   | `/jobs/rollback`  | Start a rollback and recovery check       |
//! | POST   | `/push`           | Deliver or broadcast to connected devices |
//!
//! Ingestion always answers 200: whether the alert was queued is reported in
//! the body, never as an HTTP error.

use crate::dispatch::{AlertDispatcher, DispatchedJob};
use crate::error::{JobError, NotifyError};
use crate::jobs::JobKind;
use crate::notify::{ConnectionHub, NotificationKind};
use crate::queue::{AlertQueue, InboundAlert, QueueStatus};
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest alert body read; anything bigger is recorded without a body.
pub const MAX_ALERT_BODY: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub queue: AlertQueue,
    pub dispatcher: Arc<AlertDispatcher>,
    pub hub: Arc<ConnectionHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/alerts", post(receive_alert).get(alerts_info))
        .route("/alerts/status", get(queue_status))
        .route("/jobs/inspect", post(start_inspect))
        .route("/jobs/analyze", post(start_analyze))
        .route("/jobs/rollback", post(start_rollback))
        .route("/push", post(push_message))
        .with_state(state)
}

/// Serve until `cancel` fires, then finish in-flight requests and return.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(listen = %addr, "HTTP server started");
    }
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertAccepted {
    pub status: String,
    pub message: String,
    pub received_at: String,
    pub added_to_queue: bool,
}

async fn receive_alert(State(state): State<AppState>, request: Request) -> Json<AlertAccepted> {
    let (parts, body) = request.into_parts();

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let headers: BTreeMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let query_params = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request_body = match axum::body::to_bytes(body, MAX_ALERT_BODY).await {
        Ok(bytes) if bytes.is_empty() => None,
        Ok(bytes) => Some(serde_json::from_slice::<Value>(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })),
        Err(e) => {
            warn!(error = %e, "Alert body unreadable, recording without body");
            None
        }
    };

    let alert = InboundAlert {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        remote_addr,
        headers,
        query_params,
        content_type,
        request_body,
    };
    debug!(remote_addr = ?alert.remote_addr, "Alert received over HTTP");

    let added_to_queue = state.queue.produce(alert);
    let message = if added_to_queue {
        "Alert queued for analysis"
    } else {
        "Alert received but no cluster id found, not queued"
    };

    Json(AlertAccepted {
        status: "success".to_string(),
        message: message.to_string(),
        received_at: Utc::now().to_rfc3339(),
        added_to_queue,
    })
}

async fn alerts_info(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "service": "cluster-alertd",
        "version": env!("CARGO_PKG_VERSION"),
        "ingest": "POST /alerts",
        "status": "GET /alerts/status",
        "queue_capacity_per_cluster": state.queue.capacity(),
    }))
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.queue.status())
}

// =============================================================================
// Jobs
// =============================================================================

/// Body of `/jobs/inspect` and `/jobs/analyze`.
#[derive(Debug, Deserialize)]
pub struct InspectRequest {
    pub recipient: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub recipient: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub status: String,
    pub kind: JobKind,
    pub cluster_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl From<DispatchedJob> for JobAccepted {
    fn from(job: DispatchedJob) -> Self {
        // The handle is dropped; the job keeps running detached.
        Self {
            status: "accepted".to_string(),
            kind: job.kind,
            cluster_id: job.cluster_id,
            app_name: job.app_name,
        }
    }
}

/// A job request that could not be dispatched.
#[derive(Debug)]
pub struct ApiError(JobError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            JobError::MissingContext(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JobError::InvalidCredentials(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn id(&self) -> &'static str {
        match &self.0 {
            JobError::MissingContext(_) => "missing_context",
            JobError::InvalidCredentials(_) => "invalid_credentials",
            _ => "internal",
        }
    }
}

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Job request failed");
        } else {
            debug!(error = %self.0, "Job request rejected");
        }
        let body = serde_json::json!({ "error": self.id(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn start_inspect(
    State(state): State<AppState>,
    Json(req): Json<InspectRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let job = state
        .dispatcher
        .dispatch_inspect(&req.recipient, req.cluster_id)?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn start_analyze(
    State(state): State<AppState>,
    Json(req): Json<InspectRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let job = state
        .dispatcher
        .dispatch_analyze(&req.recipient, req.cluster_id)?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn start_rollback(
    State(state): State<AppState>,
    Json(req): Json<RollbackRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let job = state
        .dispatcher
        .dispatch_rollback(&req.recipient, req.cluster_id, req.app_name)?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

// =============================================================================
// Push
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PushMessageRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    pub message: String,
    #[serde(default = "default_push_kind")]
    pub notification_type: NotificationKind,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub exclude_devices: Vec<String>,
}

fn default_push_kind() -> NotificationKind {
    NotificationKind::Info
}

fn push_rejected(status: StatusCode, error: &str, message: String) -> Response {
    debug!(error, message = %message, "Push request rejected");
    let body = serde_json::json!({ "success": false, "error": error, "message": message });
    (status, Json(body)).into_response()
}

/// Deliver to one connected device, or to all of them except `exclude_devices`.
///
/// A broadcast always answers 200 with the delivery counts. A single delivery
/// answers 404 for an unknown device and 410 for a closed connection.
async fn push_message(
    State(state): State<AppState>,
    Json(req): Json<PushMessageRequest>,
) -> Response {
    if req.message.trim().is_empty() {
        return push_rejected(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "message must not be empty".to_string(),
        );
    }
    let kind = req.notification_type;

    if req.broadcast {
        let exclude: Vec<&str> = req.exclude_devices.iter().map(String::as_str).collect();
        let summary = state.hub.broadcast(&req.message, kind, &exclude).await;
        let body = serde_json::json!({
            "success": true,
            "notification_type": kind,
            "success_count": summary.success_count,
            "total_count": summary.total_count,
            "excluded_devices": req.exclude_devices,
        });
        return Json(body).into_response();
    }

    let Some(device_id) = req.device_id.filter(|id| !id.is_empty()) else {
        return push_rejected(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "device_id is required unless broadcast is set".to_string(),
        );
    };

    match state.hub.notify_one(&device_id, &req.message, kind).await {
        Ok(()) => Json(serde_json::json!({
            "success": true,
            "device_id": device_id,
            "notification_type": kind,
        }))
        .into_response(),
        Err(e @ NotifyError::RecipientNotFound(_)) => {
            push_rejected(StatusCode::NOT_FOUND, "device_not_found", e.to_string())
        }
        Err(e @ NotifyError::ConnectionClosed(_)) => {
            push_rejected(StatusCode::GONE, "connection_closed", e.to_string())
        }
        Err(e) => {
            warn!(device_id = %device_id, error = %e, "Push delivery failed");
            push_rejected(StatusCode::BAD_GATEWAY, "delivery_failed", e.to_string())
        }
    }
}
