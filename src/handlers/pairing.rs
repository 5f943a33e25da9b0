//! # Pairing Handlers
//!
//! QR pairing flow: begin a session, inspect it, refresh the code, dismiss
//! the pairing UI, and disconnect a paired instance.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::WorkspaceExtension;
use crate::error::{ErrorBody, LifecycleError};
use crate::handlers::connections::{ConnectionInfo, ConnectionsResponse};
use crate::pairing::PairingSnapshot;
use crate::server::AppState;

/// A freshly issued pairing payload
#[derive(Debug, Serialize, ToSchema)]
pub struct QrCodeResponse {
    pub qr_code: String,
}

/// Begins pairing: reuses the cached QR or fetches one, then watches for
/// the scan
#[utoipa::path(
    post,
    path = "/connections/{id}/connect",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    responses(
        (status = 200, description = "Pairing started", body = ConnectionInfo),
        (status = 404, description = "Connection not found", body = ErrorBody),
        (status = 502, description = "Provider unreachable", body = ErrorBody)
    ),
    tag = "pairing"
)]
pub async fn connect_instance(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, LifecycleError> {
    let connection = state.controller.connect_instance(workspace.0, id).await?;
    Ok(Json(ConnectionInfo::from(connection)))
}

/// Current pairing session state
#[utoipa::path(
    get,
    path = "/connections/{id}/pairing",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    responses(
        (status = 200, description = "Pairing session snapshot", body = PairingSnapshot),
        (status = 404, description = "No session for this connection", body = ErrorBody)
    ),
    tag = "pairing"
)]
pub async fn pairing_status(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<PairingSnapshot>, LifecycleError> {
    let snapshot = state.controller.pairing_snapshot(workspace.0, id).await?;
    snapshot
        .map(Json)
        .ok_or_else(|| LifecycleError::NotFound("no pairing session for this connection".to_string()))
}

/// Issues a new QR code for a session still awaiting a scan
#[utoipa::path(
    post,
    path = "/connections/{id}/pairing/refresh",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    responses(
        (status = 200, description = "Fresh pairing payload", body = QrCodeResponse),
        (status = 400, description = "Session is not awaiting a scan", body = ErrorBody),
        (status = 404, description = "Connection or session not found", body = ErrorBody)
    ),
    tag = "pairing"
)]
pub async fn refresh_qr_code(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<QrCodeResponse>, LifecycleError> {
    let qr_code = state.controller.refresh_qr(workspace.0, id).await?;
    Ok(Json(QrCodeResponse { qr_code }))
}

/// Dismisses the pairing UI, cancelling the watcher
#[utoipa::path(
    delete,
    path = "/connections/{id}/pairing",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    responses(
        (status = 204, description = "Pairing session dismissed"),
        (status = 404, description = "Connection not found", body = ErrorBody)
    ),
    tag = "pairing"
)]
pub async fn dismiss_pairing(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, LifecycleError> {
    state.controller.dismiss_pairing(workspace.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Disconnects the instance from the provider
#[utoipa::path(
    post,
    path = "/connections/{id}/disconnect",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    responses(
        (status = 200, description = "Disconnected; fresh workspace list", body = ConnectionsResponse),
        (status = 404, description = "Connection not found", body = ErrorBody),
        (status = 502, description = "Provider unreachable", body = ErrorBody)
    ),
    tag = "pairing"
)]
pub async fn disconnect_instance(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionsResponse>, LifecycleError> {
    let connections = state
        .controller
        .disconnect_instance(workspace.0, id)
        .await?;
    Ok(Json(ConnectionsResponse {
        connections: connections.into_iter().map(ConnectionInfo::from).collect(),
    }))
}
