//! # API Handlers
//!
//! Axum handlers for the UI-facing operations of the connections service.

pub mod connections;
pub mod events;
pub mod pairing;

use axum::response::Json;

use crate::models::ServiceInfo;

/// Service information endpoint
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "service"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
