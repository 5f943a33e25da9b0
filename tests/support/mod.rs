//! Shared helpers for integration tests: an engine over an in-memory
//! SQLite store and provider adapters pointed at wiremock servers.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use sea_orm::Database;
use uuid::Uuid;

use connections::config::AppConfig;
use connections::controller::{ConnectionLifecycleController, CreateConnectionParams};
use connections::events::EventBus;
use connections::models::connection::Model as Connection;
use connections::pairing::QrSessionManager;
use connections::providers::registry::ProviderRegistry;
use connections::providers::trait_::HistoryRecovery;
use connections::providers::{EvolutionAdapter, ProviderKind, ZapiAdapter};
use connections::reconciler::StatusReconciler;
use connections::repositories::connection::{ConnectionStore, SqlConnectionStore};
use migration::{Migrator, MigratorTrait};

pub struct TestEngine {
    pub controller: Arc<ConnectionLifecycleController>,
    pub store: Arc<dyn ConnectionStore>,
    pub workspace_id: Uuid,
}

/// Test configuration: no retry delay, fast pairing polls, no jitter.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.admin_tokens = vec!["admin-token".to_string()];
    config.agent_tokens = vec!["agent-token".to_string()];
    config.retry.delay_seconds = 0;
    config.pairing.poll_interval_seconds = 1;
    config.pairing.jitter_factor = 0.0;
    config
}

pub async fn engine(registry: ProviderRegistry, config: AppConfig) -> TestEngine {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    Migrator::up(&db, None).await.expect("migrations");

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
    let controller = Arc::new(ConnectionLifecycleController::new(
        Arc::clone(&store),
        registry,
        reconciler,
        pairing,
        events,
        &config,
    ));

    TestEngine {
        controller,
        store,
        workspace_id: Uuid::new_v4(),
    }
}

pub fn evolution_registry(base_url: &str) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(
        ProviderKind::Evolution,
        Arc::new(EvolutionAdapter::new(
            base_url.to_string(),
            "test-key".to_string(),
        )),
    );
    registry
}

pub fn zapi_registry(base_url: &str) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(
        ProviderKind::Zapi,
        Arc::new(ZapiAdapter::new(
            base_url.to_string(),
            "test-client-token".to_string(),
        )),
    );
    registry
}

pub fn seed_row(workspace_id: Uuid, name: &str, provider: ProviderKind) -> Connection {
    Connection {
        id: Uuid::new_v4(),
        workspace_id,
        instance_name: name.to_string(),
        provider: provider.as_str().to_string(),
        external_id: match provider {
            ProviderKind::Zapi => Some("INST1:TOK1".to_string()),
            ProviderKind::Evolution => Some(name.to_string()),
        },
        status: "disconnected".to_string(),
        phone_number: None,
        qr_code: None,
        is_default: false,
        default_pipeline_id: None,
        default_column_id: None,
        queue_id: None,
        auto_create_crm_card: false,
        metadata: None,
        created_at: Utc::now().into(),
        updated_at: Utc::now().into(),
    }
}

pub fn create_params(
    workspace_id: Uuid,
    name: &str,
    provider: ProviderKind,
) -> CreateConnectionParams {
    CreateConnectionParams {
        workspace_id,
        instance_name: name.to_string(),
        provider,
        phone_number: None,
        history_recovery: HistoryRecovery::None,
        queue_id: None,
        default_pipeline_id: None,
        default_column_id: None,
        auto_create_crm_card: false,
        metadata: None,
    }
}
