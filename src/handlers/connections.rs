//! # Connection CRUD Handlers
//!
//! Workspace-scoped connection listing, creation, editing, deletion,
//! default selection, and the bulk status sync.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{RoleExtension, WorkspaceExtension};
use crate::controller::{CreateConnectionParams, EditConnectionParams};
use crate::error::{ErrorBody, LifecycleError};
use crate::providers::trait_::HistoryRecovery;
use crate::providers::ProviderKind;
use crate::reconciler::SyncReport;
use crate::server::AppState;

/// Connection information for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    /// Unique identifier for the connection
    #[schema(value_type = String)]
    pub id: Uuid,
    /// Human label, unique per workspace
    pub instance_name: String,
    /// Provider slug ("evolution" | "zapi")
    pub provider: String,
    /// Canonical status
    pub status: String,
    /// Digits-only phone with country prefix, present once paired
    pub phone_number: Option<String>,
    /// Pairing payload, present only while status is "qr"
    pub qr_code: Option<String>,
    /// Whether this is the workspace's default sender
    pub is_default: bool,
    #[schema(value_type = Option<String>)]
    pub default_pipeline_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub default_column_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub queue_id: Option<Uuid>,
    pub auto_create_crm_card: bool,
    /// Free-form metadata bag
    pub metadata: JsonValue,
    pub created_at: String,
    pub updated_at: String,
}

impl From<crate::models::connection::Model> for ConnectionInfo {
    fn from(model: crate::models::connection::Model) -> Self {
        let to_rfc3339 = |dt: sea_orm::prelude::DateTimeWithTimeZone| {
            let utc: DateTime<Utc> = dt.naive_utc().and_utc();
            utc.to_rfc3339()
        };
        Self {
            id: model.id,
            instance_name: model.instance_name,
            provider: model.provider,
            status: model.status,
            phone_number: model.phone_number,
            qr_code: model.qr_code,
            is_default: model.is_default,
            default_pipeline_id: model.default_pipeline_id,
            default_column_id: model.default_column_id,
            queue_id: model.queue_id,
            auto_create_crm_card: model.auto_create_crm_card,
            metadata: model.metadata.unwrap_or_default(),
            created_at: to_rfc3339(model.created_at),
            updated_at: to_rfc3339(model.updated_at),
        }
    }
}

/// Response wrapper for connection listings
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionInfo>,
}

/// Request body for creating a connection
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConnectionRequest {
    /// Human label, unique per workspace (case-insensitive)
    pub instance_name: String,
    /// Provider to create the instance on
    pub provider: ProviderKind,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub history_recovery: HistoryRecovery,
    #[schema(value_type = Option<String>)]
    pub queue_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub default_pipeline_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub default_column_id: Option<Uuid>,
    #[serde(default)]
    pub auto_create_crm_card: bool,
    pub metadata: Option<JsonValue>,
}

/// Request body for editing a connection
#[derive(Debug, Deserialize, ToSchema)]
pub struct EditConnectionRequest {
    /// New label; renames are supported for Z-API connections only
    pub instance_name: Option<String>,
    pub phone_number: Option<String>,
    #[schema(value_type = Option<String>)]
    pub queue_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub default_pipeline_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub default_column_id: Option<Uuid>,
    pub auto_create_crm_card: Option<bool>,
    pub metadata: Option<JsonValue>,
}

/// Request body for deleting a connection
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeleteConnectionRequest {
    /// Must match the connection's instance name exactly
    pub confirm_name: String,
}

/// Lists connections for the workspace
#[utoipa::path(
    get,
    path = "/connections",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Workspace connections", body = ConnectionsResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
) -> Result<Json<ConnectionsResponse>, LifecycleError> {
    let connections = state.controller.list_connections(workspace.0).await?;
    Ok(Json(ConnectionsResponse {
        connections: connections.into_iter().map(ConnectionInfo::from).collect(),
    }))
}

/// Creates a connection and its remote provider instance
#[utoipa::path(
    post,
    path = "/connections",
    security(("bearer_auth" = [])),
    request_body = CreateConnectionRequest,
    responses(
        (status = 201, description = "Connection created", body = ConnectionInfo),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 422, description = "Provider not configured", body = ErrorBody),
        (status = 502, description = "Provider unreachable", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn create_connection(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Json(body): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionInfo>), LifecycleError> {
    let params = CreateConnectionParams {
        workspace_id: workspace.0,
        instance_name: body.instance_name,
        provider: body.provider,
        phone_number: body.phone_number,
        history_recovery: body.history_recovery,
        queue_id: body.queue_id,
        default_pipeline_id: body.default_pipeline_id,
        default_column_id: body.default_column_id,
        auto_create_crm_card: body.auto_create_crm_card,
        metadata: body.metadata,
    };

    let connection = state.controller.create_connection(params).await?;
    Ok((StatusCode::CREATED, Json(ConnectionInfo::from(connection))))
}

/// Edits a connection's label and routing defaults
#[utoipa::path(
    patch,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    request_body = EditConnectionRequest,
    responses(
        (status = 200, description = "Connection updated", body = ConnectionInfo),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 404, description = "Connection not found", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn edit_connection(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Path(id): Path<Uuid>,
    Json(body): Json<EditConnectionRequest>,
) -> Result<Json<ConnectionInfo>, LifecycleError> {
    let params = EditConnectionParams {
        instance_name: body.instance_name,
        phone_number: body.phone_number,
        queue_id: body.queue_id,
        default_pipeline_id: body.default_pipeline_id,
        default_column_id: body.default_column_id,
        auto_create_crm_card: body.auto_create_crm_card,
        metadata: body.metadata,
    };

    let connection = state
        .controller
        .edit_connection(workspace.0, id, params)
        .await?;
    Ok(Json(ConnectionInfo::from(connection)))
}

/// Deletes a connection and its remote instance (admin only)
#[utoipa::path(
    delete,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    request_body = DeleteConnectionRequest,
    responses(
        (status = 204, description = "Connection deleted"),
        (status = 400, description = "Confirmation mismatch", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody),
        (status = 404, description = "Connection not found", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    RoleExtension(role): RoleExtension,
    Path(id): Path<Uuid>,
    Json(body): Json<DeleteConnectionRequest>,
) -> Result<StatusCode, LifecycleError> {
    state
        .controller
        .delete_connection(workspace.0, id, role, &body.confirm_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Makes a connection the workspace default
#[utoipa::path(
    post,
    path = "/connections/{id}/default",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Connection identifier")),
    responses(
        (status = 200, description = "Default connection changed", body = ConnectionInfo),
        (status = 404, description = "Connection not found", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn set_default_connection(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, LifecycleError> {
    let connection = state
        .controller
        .set_default_connection(workspace.0, id)
        .await?;
    Ok(Json(ConnectionInfo::from(connection)))
}

/// Trues up every workspace connection against live provider status
#[utoipa::path(
    post,
    path = "/connections/sync",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sync report", body = SyncReport)
    ),
    tag = "connections"
)]
pub async fn sync_connections(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
) -> Result<Json<SyncReport>, LifecycleError> {
    let report = state.controller.sync_workspace(workspace.0).await?;
    Ok(Json(report))
}
