//! Entity models for the Connections API.

pub mod connection;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Basic service information returned by the root endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    /// Service version
    pub version: String,
}
