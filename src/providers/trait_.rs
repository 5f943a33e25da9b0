//! Provider adapter trait definition
//!
//! Defines the uniform interface both external WhatsApp providers are driven
//! through. The concrete adapter for a connection is resolved once, at the
//! registry, and passed around as `Arc<dyn ProviderAdapter>`; nothing
//! downstream branches on the provider tag again.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::connection::Model as Connection;
use crate::providers::status::ConnectionStatus;

/// Structured adapter error, classified at the boundary.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Upstream answered with a non-success HTTP status
    Http { status: u16, body: Option<String> },
    /// The request never completed (DNS, refused connection, timeout)
    Network { details: String },
    /// The remote instance no longer exists (404-class)
    NotFound { details: String },
    /// The provider is not configured for this deployment
    NotConfigured { details: String },
    /// The provider answered but the payload did not parse
    Malformed { details: String },
    /// Anything uncategorized
    Unknown { details: String },
}

impl ProviderError {
    /// Collapse an HTTP status into the structured variants. 404s get their
    /// own class because pairing and QR refresh react to them specifically.
    pub fn from_http(status: u16, body: Option<String>) -> Self {
        if status == 404 {
            ProviderError::NotFound {
                details: body.unwrap_or_else(|| "instance not found".to_string()),
            }
        } else {
            ProviderError::Http { status, body }
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http { status, body } => {
                write!(
                    f,
                    "HTTP error {}: {}",
                    status,
                    body.as_deref().unwrap_or("no body")
                )
            }
            ProviderError::Network { details } => write!(f, "network error: {}", details),
            ProviderError::NotFound { details } => write!(f, "not found: {}", details),
            ProviderError::NotConfigured { details } => {
                write!(f, "provider not configured: {}", details)
            }
            ProviderError::Malformed { details } => write!(f, "malformed response: {}", details),
            ProviderError::Unknown { details } => write!(f, "unknown error: {}", details),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed {
                details: err.to_string(),
            }
        } else if err.is_connect() || err.is_timeout() || err.is_request() {
            ProviderError::Network {
                details: err.to_string(),
            }
        } else {
            ProviderError::Unknown {
                details: err.to_string(),
            }
        }
    }
}

/// How much chat history the provider should backfill after pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRecovery {
    None,
    Week,
    Month,
}

impl Default for HistoryRecovery {
    fn default() -> Self {
        HistoryRecovery::None
    }
}

/// Parameters for creating a remote instance
#[derive(Debug, Clone)]
pub struct CreateInstanceRequest {
    pub workspace_id: Uuid,
    pub instance_name: String,
    pub phone_number: Option<String>,
    pub history_recovery: HistoryRecovery,
    pub metadata: Option<JsonValue>,
}

/// Result of creating a remote instance
#[derive(Debug, Clone)]
pub struct CreateInstanceResponse {
    /// Provider-side handle to persist in `external_id`
    pub external_id: Option<String>,
    /// Canonical status reported at creation, if any
    pub status: Option<ConnectionStatus>,
    /// Pairing payload, when the provider issues one immediately
    pub qr_code: Option<String>,
}

/// Single live status observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusProbe {
    pub status: ConnectionStatus,
    pub phone_number: Option<String>,
}

/// Uniform interface over the two concrete providers.
///
/// Every raw status string crossing this boundary has already been mapped
/// through [`crate::providers::status::normalize`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider slug this adapter serves ("evolution" | "zapi").
    fn slug(&self) -> &'static str;

    /// Create the remote instance; may return a QR payload immediately.
    async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, ProviderError>;

    /// Single live status query.
    async fn get_status(&self, connection: &Connection) -> Result<StatusProbe, ProviderError>;

    /// Fetch a pairing payload for an instance that has none cached.
    async fn get_qr_code(&self, connection: &Connection) -> Result<String, ProviderError>;

    /// Force a new pairing payload after the prior one expired.
    async fn refresh_qr_code(&self, connection: &Connection) -> Result<String, ProviderError>;

    /// Log the instance out. Idempotent: disconnecting an already
    /// disconnected instance succeeds silently.
    async fn disconnect(&self, connection: &Connection) -> Result<(), ProviderError>;

    /// Delete the remote instance.
    async fn delete_instance(&self, connection: &Connection) -> Result<(), ProviderError>;
}

/// Reduce a provider-reported identity to digits only, keeping the country
/// prefix. WhatsApp JIDs arrive as `5511999999999@s.whatsapp.net`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let bare = raw.split('@').next().unwrap_or(raw);
    let digits: String = bare.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_phone_strips_jid_suffix() {
        assert_eq!(
            normalize_phone("5511999999999@s.whatsapp.net").as_deref(),
            Some("5511999999999")
        );
    }

    #[test]
    fn normalize_phone_strips_formatting() {
        assert_eq!(
            normalize_phone("+55 (11) 99999-9999").as_deref(),
            Some("5511999999999")
        );
    }

    #[test]
    fn normalize_phone_rejects_empty() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("@s.whatsapp.net"), None);
    }

    #[test]
    fn http_404_maps_to_not_found() {
        let err = ProviderError::from_http(404, Some("gone".to_string()));
        assert!(matches!(err, ProviderError::NotFound { .. }));

        let err = ProviderError::from_http(500, None);
        assert!(matches!(err, ProviderError::Http { status: 500, .. }));
    }
}
