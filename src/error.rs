//! # Error Handling
//!
//! The engine funnels every provider and store failure through one typed
//! taxonomy before anything reaches the UI. Handlers render it as a
//! problem+json response; raw provider strings only ever surface as the
//! message payload of the `Unknown` class.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::providers::registry::RegistryError;
use crate::providers::trait_::ProviderError;
use crate::retry::{ErrorClass, classify};

/// Engine error taxonomy.
///
/// Every UI-facing operation returns one of these; the class decides both
/// the HTTP mapping and whether the retry policy was allowed to spend
/// attempts on it.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Empty/duplicate name, limit reached, bad confirmation. Surfaced
    /// before any remote call.
    #[error("{0}")]
    Validation(String),

    /// The selected provider is not configured. Never retried.
    #[error("provider '{provider}' is not configured")]
    ProviderConfig { provider: String },

    /// Network-class failure. Retried during creation; the final surface
    /// carries the attempt count.
    #[error("could not reach the provider after {attempts} attempt(s): {details}")]
    TransientNetwork { attempts: u32, details: String },

    /// Non-privileged actor attempting a privileged operation.
    #[error("{0}")]
    Permission(String),

    /// Local row or remote instance missing.
    #[error("{0}")]
    NotFound(String),

    /// Anything uncategorized, surfaced verbatim.
    #[error("{0}")]
    Unknown(String),
}

impl LifecycleError {
    /// Error code for programmatic handling (SCREAMING_SNAKE_CASE).
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Validation(_) => "VALIDATION_FAILED",
            LifecycleError::ProviderConfig { .. } => "PROVIDER_NOT_CONFIGURED",
            LifecycleError::TransientNetwork { .. } => "PROVIDER_UNREACHABLE",
            LifecycleError::Permission(_) => "FORBIDDEN",
            LifecycleError::NotFound(_) => "NOT_FOUND",
            LifecycleError::Unknown(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
            LifecycleError::ProviderConfig { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LifecycleError::TransientNetwork { .. } => StatusCode::BAD_GATEWAY,
            LifecycleError::Permission(_) => StatusCode::FORBIDDEN,
            LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
            LifecycleError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Classify a provider failure that occurred outside the retry path
    /// (status checks, QR fetches, disconnect, delete).
    pub fn from_provider(err: ProviderError) -> Self {
        Self::from_provider_attempts(err, 1)
    }

    /// Classify a provider failure, recording how many attempts were spent.
    pub fn from_provider_attempts(err: ProviderError, attempts: u32) -> Self {
        match classify(&err) {
            ErrorClass::TransientNetwork => LifecycleError::TransientNetwork {
                attempts,
                details: err.to_string(),
            },
            ErrorClass::NotFound => LifecycleError::NotFound(err.to_string()),
            ErrorClass::Permission => LifecycleError::Permission(err.to_string()),
            ErrorClass::ProviderConfig => match err {
                ProviderError::NotConfigured { details } => {
                    LifecycleError::ProviderConfig { provider: details }
                }
                other => LifecycleError::ProviderConfig {
                    provider: other.to_string(),
                },
            },
            ErrorClass::Validation => LifecycleError::Validation(err.to_string()),
            ErrorClass::Unknown => LifecycleError::Unknown(err.to_string()),
        }
    }

    /// Map a store failure. Unique violations fold into the same validation
    /// error as the pre-check, guarding the race between check and insert.
    pub fn from_store(err: anyhow::Error) -> Self {
        if let Some(db_err) = err.downcast_ref::<sea_orm::DbErr>() {
            if is_unique_violation(db_err) {
                return LifecycleError::Validation(
                    "a connection with this name already exists".to_string(),
                );
            }
            if matches!(db_err, sea_orm::DbErr::RecordNotFound(_)) {
                return LifecycleError::NotFound(db_err.to_string());
            }
        }
        tracing::error!(error = ?err, "Store operation failed");
        LifecycleError::Unknown("store operation failed".to_string())
    }
}

impl From<RegistryError> for LifecycleError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ProviderNotConfigured { name } => {
                LifecycleError::ProviderConfig { provider: name }
            }
            RegistryError::UnknownProvider { name } => {
                LifecycleError::Validation(format!("unknown provider '{}'", name))
            }
        }
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code.as_ref() == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}

/// Wire form of an engine error (problem+json body)
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        (self.status_code(), headers, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_line_up() {
        let cases: Vec<(LifecycleError, StatusCode, &str)> = vec![
            (
                LifecycleError::Validation("empty name".to_string()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
            ),
            (
                LifecycleError::ProviderConfig {
                    provider: "zapi".to_string(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "PROVIDER_NOT_CONFIGURED",
            ),
            (
                LifecycleError::TransientNetwork {
                    attempts: 3,
                    details: "connection refused".to_string(),
                },
                StatusCode::BAD_GATEWAY,
                "PROVIDER_UNREACHABLE",
            ),
            (
                LifecycleError::Permission("admin role required".to_string()),
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
            (
                LifecycleError::NotFound("no such connection".to_string()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                LifecycleError::Unknown("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn transient_surface_carries_attempt_count() {
        let err = LifecycleError::from_provider_attempts(
            ProviderError::Network {
                details: "dns failure".to_string(),
            },
            3,
        );
        assert!(err.to_string().contains("3 attempt"));
    }

    #[test]
    fn provider_404_maps_to_not_found() {
        let err = LifecycleError::from_provider(ProviderError::NotFound {
            details: "instance gone".to_string(),
        });
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[test]
    fn response_uses_problem_json() {
        let response =
            LifecycleError::Validation("instance name must not be empty".to_string())
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }
}
