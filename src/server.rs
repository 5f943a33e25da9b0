//! # Server Configuration
//!
//! Application state, router assembly, and startup for the Connections API.

use std::sync::Arc;

use axum::{
    Router,
    middleware,
    routing::{get, patch, post},
};
use sea_orm::DatabaseConnection;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::controller::ConnectionLifecycleController;
use crate::events::EventBus;
use crate::handlers;
use crate::pairing::QrSessionManager;
use crate::providers::registry::ProviderRegistry;
use crate::reconciler::StatusReconciler;
use crate::repositories::connection::{ConnectionStore, SqlConnectionStore};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub controller: Arc<ConnectionLifecycleController>,
}

/// Wire the engine together over a database connection and registry.
pub fn build_controller(
    config: &AppConfig,
    db: DatabaseConnection,
    registry: ProviderRegistry,
) -> Arc<ConnectionLifecycleController> {
    let store: Arc<dyn ConnectionStore> = Arc::new(SqlConnectionStore::new(Arc::new(db)));
    let registry = Arc::new(registry);
    let events = EventBus::default();

    let reconciler = Arc::new(StatusReconciler::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        config.sync.concurrency as usize,
    ));
    let pairing = Arc::new(QrSessionManager::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&reconciler),
        events.clone(),
        &config.pairing,
    ));

    Arc::new(ConnectionLifecycleController::new(
        store, registry, reconciler, pairing, events, config,
    ))
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let protected = Router::new()
        .route(
            "/connections",
            get(handlers::connections::list_connections)
                .post(handlers::connections::create_connection),
        )
        .route(
            "/connections/{id}",
            patch(handlers::connections::edit_connection)
                .delete(handlers::connections::delete_connection),
        )
        .route(
            "/connections/{id}/default",
            post(handlers::connections::set_default_connection),
        )
        .route(
            "/connections/sync",
            post(handlers::connections::sync_connections),
        )
        .route(
            "/connections/{id}/connect",
            post(handlers::pairing::connect_instance),
        )
        .route(
            "/connections/{id}/pairing",
            get(handlers::pairing::pairing_status).delete(handlers::pairing::dismiss_pairing),
        )
        .route(
            "/connections/{id}/pairing/refresh",
            post(handlers::pairing::refresh_qr_code),
        )
        .route(
            "/connections/{id}/disconnect",
            post(handlers::pairing::disconnect_instance),
        )
        .route(
            "/connections/events",
            get(handlers::events::connection_events),
        )
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .route("/", get(handlers::root))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ProviderRegistry::from_config(&config);
    let controller = build_controller(&config, db, registry);
    let state = AppState {
        config: Arc::new(config),
        controller,
    };

    let addr = state
        .config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::create_connection,
        crate::handlers::connections::edit_connection,
        crate::handlers::connections::delete_connection,
        crate::handlers::connections::set_default_connection,
        crate::handlers::connections::sync_connections,
        crate::handlers::pairing::connect_instance,
        crate::handlers::pairing::pairing_status,
        crate::handlers::pairing::refresh_qr_code,
        crate::handlers::pairing::dismiss_pairing,
        crate::handlers::pairing::disconnect_instance,
        crate::handlers::events::connection_events,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::connections::CreateConnectionRequest,
            crate::handlers::connections::EditConnectionRequest,
            crate::handlers::connections::DeleteConnectionRequest,
            crate::handlers::pairing::QrCodeResponse,
            crate::error::ErrorBody,
            crate::pairing::PairingSnapshot,
            crate::pairing::PairingState,
            crate::reconciler::SyncReport,
            crate::reconciler::SyncOutcome,
            crate::reconciler::SyncUpdate,
            crate::reconciler::SyncFailure,
            crate::providers::ProviderKind,
            crate::providers::status::ConnectionStatus,
            crate::providers::trait_::HistoryRecovery,
        )
    ),
    info(
        title = "Zapflow Connections API",
        description = "WhatsApp connection lifecycle and status reconciliation service",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
