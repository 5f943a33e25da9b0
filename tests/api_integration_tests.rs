//! HTTP surface tests: auth gating, workspace header validation, and the
//! list endpoint end to end through the router.

mod support;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use uuid::Uuid;

use connections::providers::ProviderKind;
use connections::server::{AppState, create_app};

use support::{engine, evolution_registry, seed_row, test_config};

async fn test_app() -> (axum::Router, support::TestEngine) {
    let config = test_config();
    let eng = engine(evolution_registry("http://127.0.0.1:9"), config.clone()).await;
    let state = AppState {
        config: Arc::new(config),
        controller: Arc::clone(&eng.controller),
    };
    (create_app(state), eng)
}

#[tokio::test]
async fn root_is_public() {
    let (app, _eng) = test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn list_connections_unauthorized_without_token() {
    let (app, _eng) = test_app().await;

    let request = Request::builder()
        .uri("/connections")
        .header("X-Workspace-Id", Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_connections_rejects_invalid_token() {
    let (app, _eng) = test_app().await;

    let request = Request::builder()
        .uri("/connections")
        .header("Authorization", "Bearer wrong-token")
        .header("X-Workspace-Id", Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_connections_requires_workspace_header() {
    let (app, _eng) = test_app().await;

    let request = Request::builder()
        .uri("/connections")
        .header("Authorization", "Bearer agent-token")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_connections_returns_workspace_rows() {
    let (app, eng) = test_app().await;
    eng.store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();
    // a row in another workspace stays invisible
    eng.store
        .upsert(seed_row(Uuid::new_v4(), "Suporte", ProviderKind::Evolution))
        .await
        .unwrap();

    let request = Request::builder()
        .uri("/connections")
        .header("Authorization", "Bearer agent-token")
        .header("X-Workspace-Id", eng.workspace_id.to_string())
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let connections = payload["connections"].as_array().unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0]["instance_name"], "Vendas");
    assert_eq!(connections[0]["status"], "disconnected");
}

#[tokio::test]
async fn delete_without_admin_token_is_forbidden() {
    let (app, eng) = test_app().await;
    let row = eng
        .store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/connections/{}", row.id))
        .header("Authorization", "Bearer agent-token")
        .header("X-Workspace-Id", eng.workspace_id.to_string())
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"confirm_name":"Vendas"}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(eng.store.get(row.id).await.unwrap().is_some());
}
