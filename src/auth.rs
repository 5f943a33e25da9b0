//! # Authentication and Authorization
//!
//! Bearer authentication with per-role token lists and workspace header
//! validation for protected API endpoints. Role is the only authorization
//! concern this service carries: deleting a connection requires admin.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::AppConfig;

/// Actor roles resolved from the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Admin,
    Agent,
}

/// Workspace ID wrapper for type safety
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct WorkspaceId(pub Uuid);

/// Extractor for the authenticated actor's role
#[derive(Debug, Clone, Copy)]
pub struct RoleExtension(pub ActorRole);

/// Extractor for the workspace scope of the request
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceExtension(pub WorkspaceId);

/// Authentication failures, rendered as problem+json.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingToken,
    #[error("Invalid bearer token")]
    InvalidToken,
    #[error("Missing required X-Workspace-Id header")]
    MissingWorkspace,
    #[error("X-Workspace-Id header must be a UUID")]
    InvalidWorkspace,
}

impl AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::MissingWorkspace | AuthError::InvalidWorkspace => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken => "UNAUTHORIZED",
            AuthError::MissingWorkspace | AuthError::InvalidWorkspace => "VALIDATION_FAILED",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        (self.status_code(), headers, axum::Json(body)).into_response()
    }
}

/// Authentication middleware that validates bearer tokens and the
/// workspace header, attaching role and workspace to the request.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let headers = request.headers().clone();

    let token = extract_bearer_token(&headers)?;
    let role = resolve_role(&config, token)?;
    let workspace = extract_workspace_id(&headers)?;

    tracing::debug!(workspace_id = %workspace.0, role = ?role, "Authenticated request");

    request.extensions_mut().insert(RoleExtension(role));
    request.extensions_mut().insert(WorkspaceExtension(workspace));

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidToken)?
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidToken)
}

fn resolve_role(config: &AppConfig, token: &str) -> Result<ActorRole, AuthError> {
    let matches = |configured: &[String]| {
        configured
            .iter()
            .any(|t| ConstantTimeEq::ct_eq(token.as_bytes(), t.as_bytes()).into())
    };

    if matches(&config.admin_tokens) {
        Ok(ActorRole::Admin)
    } else if matches(&config.agent_tokens) {
        Ok(ActorRole::Agent)
    } else {
        Err(AuthError::InvalidToken)
    }
}

fn extract_workspace_id(headers: &HeaderMap) -> Result<WorkspaceId, AuthError> {
    let header_value = headers
        .get("X-Workspace-Id")
        .ok_or(AuthError::MissingWorkspace)?
        .to_str()
        .map_err(|_| AuthError::InvalidWorkspace)?;

    header_value
        .parse::<Uuid>()
        .map(WorkspaceId)
        .map_err(|_| AuthError::InvalidWorkspace)
}

impl<S> FromRequestParts<S> for RoleExtension
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RoleExtension>()
            .copied()
            .ok_or(AuthError::MissingToken)
    }
}

impl<S> FromRequestParts<S> for WorkspaceExtension
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<WorkspaceExtension>()
            .copied()
            .ok_or(AuthError::MissingWorkspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_tokens() -> AppConfig {
        let mut config = AppConfig::default();
        config.admin_tokens = vec!["admin-token".to_string()];
        config.agent_tokens = vec!["agent-token".to_string()];
        config
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(AuthError::MissingToken)
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(AuthError::InvalidToken)
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc");
    }

    #[test]
    fn role_resolution() {
        let config = config_with_tokens();
        assert_eq!(resolve_role(&config, "admin-token").unwrap(), ActorRole::Admin);
        assert_eq!(resolve_role(&config, "agent-token").unwrap(), ActorRole::Agent);
        assert!(matches!(
            resolve_role(&config, "nope"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn workspace_header_must_be_uuid() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            extract_workspace_id(&headers),
            Err(AuthError::MissingWorkspace)
        ));

        headers.insert("X-Workspace-Id", HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            extract_workspace_id(&headers),
            Err(AuthError::InvalidWorkspace)
        ));

        let id = Uuid::new_v4();
        headers.insert(
            "X-Workspace-Id",
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        assert_eq!(extract_workspace_id(&headers).unwrap(), WorkspaceId(id));
    }
}
