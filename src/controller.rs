//! Connection lifecycle controller
//!
//! The orchestration root. Every UI-facing operation enters here, gets
//! validated, resolves its provider adapter exactly once, touches the store,
//! and publishes change events. The controller never trusts optimistic local
//! state: after a mutation it re-reads the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::ActorRole;
use crate::config::AppConfig;
use crate::error::LifecycleError;
use crate::events::{ConnectionEvent, EventBus};
use crate::models::connection::Model as Connection;
use crate::pairing::QrSessionManager;
use crate::providers::registry::ProviderRegistry;
use crate::providers::status::ConnectionStatus;
use crate::providers::trait_::{CreateInstanceRequest, HistoryRecovery};
use crate::providers::ProviderKind;
use crate::reconciler::{StatusReconciler, SyncReport};
use crate::repositories::connection::ConnectionStore;
use crate::retry::RetryPolicy;

/// Parameters for creating a connection.
#[derive(Debug, Clone)]
pub struct CreateConnectionParams {
    pub workspace_id: Uuid,
    pub instance_name: String,
    pub provider: ProviderKind,
    pub phone_number: Option<String>,
    pub history_recovery: HistoryRecovery,
    pub queue_id: Option<Uuid>,
    pub default_pipeline_id: Option<Uuid>,
    pub default_column_id: Option<Uuid>,
    pub auto_create_crm_card: bool,
    pub metadata: Option<JsonValue>,
}

/// Parameters for editing a connection. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct EditConnectionParams {
    pub instance_name: Option<String>,
    pub phone_number: Option<String>,
    pub queue_id: Option<Uuid>,
    pub default_pipeline_id: Option<Uuid>,
    pub default_column_id: Option<Uuid>,
    pub auto_create_crm_card: Option<bool>,
    pub metadata: Option<JsonValue>,
}

/// Orchestrates create/edit/delete/connect/disconnect/set-default/sync.
pub struct ConnectionLifecycleController {
    store: Arc<dyn ConnectionStore>,
    registry: Arc<ProviderRegistry>,
    reconciler: Arc<StatusReconciler>,
    pairing: Arc<QrSessionManager>,
    events: EventBus,
    retry: RetryPolicy,
    max_connections_per_workspace: u64,
}

impl ConnectionLifecycleController {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        registry: Arc<ProviderRegistry>,
        reconciler: Arc<StatusReconciler>,
        pairing: Arc<QrSessionManager>,
        events: EventBus,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            registry,
            reconciler,
            pairing,
            events,
            retry: RetryPolicy::new(
                config.retry.max_attempts,
                Duration::from_secs(config.retry.delay_seconds),
            ),
            max_connections_per_workspace: config.max_connections_per_workspace as u64,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// List the workspace's connections from the store.
    pub async fn list_connections(
        &self,
        workspace_id: Uuid,
    ) -> Result<Vec<Connection>, LifecycleError> {
        self.store
            .list(workspace_id)
            .await
            .map_err(LifecycleError::from_store)
    }

    /// Fetch a connection, scoped to the caller's workspace. A row from a
    /// different workspace reads as not-found, never as forbidden.
    pub async fn get_connection(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Connection, LifecycleError> {
        self.store
            .get(id)
            .await
            .map_err(LifecycleError::from_store)?
            .filter(|row| row.workspace_id == workspace_id)
            .ok_or_else(|| LifecycleError::NotFound(format!("connection {} not found", id)))
    }

    /// Create a connection: validate, create the remote instance under the
    /// retry policy, persist, and hand off to pairing when a QR is at hand.
    #[instrument(skip_all, fields(workspace_id = %params.workspace_id, provider = %params.provider))]
    pub async fn create_connection(
        &self,
        params: CreateConnectionParams,
    ) -> Result<Connection, LifecycleError> {
        let instance_name = validate_instance_name(&params.instance_name)?;

        // Fail fast, before any remote side effect.
        if let Some(existing) = self
            .store
            .find_by_name(params.workspace_id, &instance_name)
            .await
            .map_err(LifecycleError::from_store)?
        {
            return Err(LifecycleError::Validation(format!(
                "a connection named '{}' already exists",
                existing.instance_name
            )));
        }

        let count = self
            .store
            .count(params.workspace_id)
            .await
            .map_err(LifecycleError::from_store)?;
        if count >= self.max_connections_per_workspace {
            return Err(LifecycleError::Validation(format!(
                "workspace connection limit of {} reached",
                self.max_connections_per_workspace
            )));
        }

        // Resolve the adapter once; an unconfigured provider surfaces here,
        // not as a failed remote call.
        let adapter = self.registry.resolve(params.provider)?;

        let request = CreateInstanceRequest {
            workspace_id: params.workspace_id,
            instance_name: instance_name.clone(),
            phone_number: params.phone_number.clone(),
            history_recovery: params.history_recovery,
            metadata: params.metadata.clone(),
        };

        let events = self.events.clone();
        let workspace_id = params.workspace_id;
        let outcome = self
            .retry
            .run(
                "create_instance",
                |progress| {
                    events.publish(ConnectionEvent::CreateRetrying {
                        workspace_id,
                        attempt: progress.attempt,
                        max_attempts: progress.max_attempts,
                    });
                },
                || adapter.create_instance(request.clone()),
            )
            .await;

        let response = outcome
            .result
            .map_err(|err| LifecycleError::from_provider_attempts(err, outcome.attempts))?;

        let status = match (&response.qr_code, response.status) {
            (Some(_), _) => ConnectionStatus::Qr,
            // A provider claiming "qr" without a payload has nothing to scan yet.
            (None, Some(ConnectionStatus::Qr)) | (None, None) => ConnectionStatus::Creating,
            (None, Some(other)) => other,
        };

        let now = Utc::now();
        let row = Connection {
            id: Uuid::new_v4(),
            workspace_id: params.workspace_id,
            instance_name,
            provider: params.provider.as_str().to_string(),
            external_id: response.external_id,
            status: status.as_str().to_string(),
            phone_number: params.phone_number,
            qr_code: response.qr_code.clone(),
            is_default: false,
            default_pipeline_id: params.default_pipeline_id,
            default_column_id: params.default_column_id,
            queue_id: params.queue_id,
            auto_create_crm_card: params.auto_create_crm_card,
            metadata: params.metadata,
            created_at: now.into(),
            updated_at: now.into(),
        };

        let persisted = self
            .store
            .upsert(row)
            .await
            .map_err(LifecycleError::from_store)?;

        info!(
            connection_id = %persisted.id,
            status = %persisted.status,
            "Connection created"
        );
        self.events.publish(ConnectionEvent::Created {
            workspace_id: persisted.workspace_id,
            connection_id: persisted.id,
        });

        if let Some(qr_code) = response.qr_code {
            // The provider issued a pairing payload right away.
            self.pairing.open(persisted.clone(), qr_code).await;
            return Ok(persisted);
        }

        if params.provider == ProviderKind::Evolution {
            // Evolution instances pair eagerly; fetch a QR now. A failure
            // here does not undo the creation.
            match self.connect_instance(persisted.workspace_id, persisted.id).await {
                Ok(connected) => return Ok(connected),
                Err(err) => {
                    warn!(
                        connection_id = %persisted.id,
                        error = %err,
                        "Immediate pairing after creation failed"
                    );
                    return Ok(persisted);
                }
            }
        }

        // Z-API without a QR: creation is provider-driven (webhooks
        // auto-configure); no pairing screen is forced.
        Ok(persisted)
    }

    /// Edit a connection. Renames are Z-API only; routing defaults and the
    /// phone number update regardless of provider.
    #[instrument(skip_all, fields(connection_id = %id))]
    pub async fn edit_connection(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        params: EditConnectionParams,
    ) -> Result<Connection, LifecycleError> {
        let mut row = self.get_connection(workspace_id, id).await?;

        if let Some(new_name) = params.instance_name {
            let new_name = validate_instance_name(&new_name)?;
            if new_name != row.instance_name {
                if row.provider == ProviderKind::Evolution.as_str() {
                    return Err(LifecycleError::Validation(
                        "Evolution instances cannot be renamed".to_string(),
                    ));
                }
                if let Some(conflict) = self
                    .store
                    .find_by_name(row.workspace_id, &new_name)
                    .await
                    .map_err(LifecycleError::from_store)?
                    && conflict.id != row.id
                {
                    return Err(LifecycleError::Validation(format!(
                        "a connection named '{}' already exists",
                        conflict.instance_name
                    )));
                }
                row.instance_name = new_name;
            }
        }

        if let Some(phone_number) = params.phone_number {
            row.phone_number = Some(phone_number);
        }
        if let Some(queue_id) = params.queue_id {
            row.queue_id = Some(queue_id);
        }
        if let Some(pipeline_id) = params.default_pipeline_id {
            row.default_pipeline_id = Some(pipeline_id);
        }
        if let Some(column_id) = params.default_column_id {
            row.default_column_id = Some(column_id);
        }
        if let Some(auto_create) = params.auto_create_crm_card {
            row.auto_create_crm_card = auto_create;
        }
        if let Some(metadata) = params.metadata {
            row.metadata = Some(metadata);
        }

        let updated = self
            .store
            .upsert(row)
            .await
            .map_err(LifecycleError::from_store)?;

        self.events.publish(ConnectionEvent::Updated {
            workspace_id: updated.workspace_id,
            connection_id: updated.id,
        });

        Ok(updated)
    }

    /// Delete a connection. Admin-only, and the caller must re-type the
    /// exact instance name. The local row goes away even when the provider
    /// reports the remote instance as already gone.
    #[instrument(skip_all, fields(connection_id = %id))]
    pub async fn delete_connection(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        actor_role: ActorRole,
        confirm_name: &str,
    ) -> Result<(), LifecycleError> {
        if actor_role != ActorRole::Admin {
            return Err(LifecycleError::Permission(
                "only administrators can delete connections".to_string(),
            ));
        }

        let row = self.get_connection(workspace_id, id).await?;

        if confirm_name != row.instance_name {
            return Err(LifecycleError::Validation(
                "confirmation does not match the instance name".to_string(),
            ));
        }

        self.pairing.close(id).await;

        let adapter = self.registry.resolve_for(&row)?;
        match adapter.delete_instance(&row).await {
            Ok(()) => {}
            Err(err) if matches!(err, crate::providers::trait_::ProviderError::NotFound { .. }) => {
                warn!(
                    connection_id = %id,
                    "Remote instance already gone, removing local row anyway"
                );
            }
            Err(err) => return Err(LifecycleError::from_provider(err)),
        }

        self.store
            .delete(id)
            .await
            .map_err(LifecycleError::from_store)?;

        info!(connection_id = %id, instance_name = %row.instance_name, "Connection deleted");
        self.events.publish(ConnectionEvent::Deleted {
            workspace_id: row.workspace_id,
            connection_id: id,
        });

        Ok(())
    }

    /// Begin (or resume) pairing: reuse the cached QR when present,
    /// otherwise fetch one, then open the watch session.
    #[instrument(skip_all, fields(connection_id = %id))]
    pub async fn connect_instance(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Connection, LifecycleError> {
        let row = self.get_connection(workspace_id, id).await?;
        let adapter = self.registry.resolve_for(&row)?;

        let qr_code = match row.qr_code.clone() {
            Some(cached) => cached,
            None => adapter
                .get_qr_code(&row)
                .await
                .map_err(LifecycleError::from_provider)?,
        };

        let mut updated = row;
        updated.status = ConnectionStatus::Qr.as_str().to_string();
        updated.qr_code = Some(qr_code.clone());
        let updated = self
            .store
            .upsert(updated)
            .await
            .map_err(LifecycleError::from_store)?;

        self.events.publish(ConnectionEvent::StatusChanged {
            workspace_id: updated.workspace_id,
            connection_id: updated.id,
            status: ConnectionStatus::Qr,
        });

        self.pairing.open(updated.clone(), qr_code).await;

        Ok(updated)
    }

    /// Disconnect from the provider. The authoritative list is re-read and
    /// pushed to subscribers even when the provider call fails, so the UI
    /// never keeps stale state.
    #[instrument(skip_all, fields(connection_id = %id))]
    pub async fn disconnect_instance(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Vec<Connection>, LifecycleError> {
        let row = self.get_connection(workspace_id, id).await?;
        let adapter = self.registry.resolve_for(&row)?;

        let result = adapter.disconnect(&row).await;

        if result.is_ok() {
            self.pairing.close(id).await;

            let mut updated = row.clone();
            updated.status = ConnectionStatus::Disconnected.as_str().to_string();
            updated.qr_code = None;
            self.store
                .upsert(updated)
                .await
                .map_err(LifecycleError::from_store)?;

            self.events.publish(ConnectionEvent::StatusChanged {
                workspace_id: row.workspace_id,
                connection_id: id,
                status: ConnectionStatus::Disconnected,
            });
        }

        let list = self
            .store
            .list(row.workspace_id)
            .await
            .map_err(LifecycleError::from_store)?;
        self.events.publish(ConnectionEvent::Updated {
            workspace_id: row.workspace_id,
            connection_id: id,
        });

        match result {
            Ok(()) => Ok(list),
            Err(err) => Err(LifecycleError::from_provider(err)),
        }
    }

    /// Make this the workspace's single default connection.
    #[instrument(skip_all, fields(connection_id = %id))]
    pub async fn set_default_connection(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Connection, LifecycleError> {
        let row = self.get_connection(workspace_id, id).await?;

        self.store
            .set_default(row.workspace_id, id)
            .await
            .map_err(LifecycleError::from_store)?;

        self.events.publish(ConnectionEvent::DefaultChanged {
            workspace_id: row.workspace_id,
            connection_id: id,
        });

        // Re-read: the row changed under us by design.
        self.get_connection(row.workspace_id, id).await
    }

    /// Bulk true-up of every connection in the workspace.
    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    pub async fn sync_workspace(&self, workspace_id: Uuid) -> Result<SyncReport, LifecycleError> {
        let connections = self
            .store
            .list(workspace_id)
            .await
            .map_err(LifecycleError::from_store)?;

        let report = self.reconciler.sync_all(connections).await;

        for update in report.updated.iter().filter(|u| u.changed) {
            self.events.publish(ConnectionEvent::StatusChanged {
                workspace_id,
                connection_id: update.connection_id,
                status: update.status,
            });
        }
        self.events.publish(ConnectionEvent::SyncCompleted {
            workspace_id,
            outcome: report.outcome,
            message: report.outcome.user_message().to_string(),
        });

        Ok(report)
    }

    /// New QR code for a session still awaiting a scan.
    pub async fn refresh_qr(&self, workspace_id: Uuid, id: Uuid) -> Result<String, LifecycleError> {
        let row = self.get_connection(workspace_id, id).await?;
        self.pairing.refresh(&row).await
    }

    /// Snapshot of the pairing session, if one is active.
    pub async fn pairing_snapshot(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<crate::pairing::PairingSnapshot>, LifecycleError> {
        self.get_connection(workspace_id, id).await?;
        Ok(self.pairing.snapshot(id).await)
    }

    /// Dismiss the pairing UI: stop the watcher for this connection.
    pub async fn dismiss_pairing(&self, workspace_id: Uuid, id: Uuid) -> Result<(), LifecycleError> {
        self.get_connection(workspace_id, id).await?;
        self.pairing.close(id).await;
        Ok(())
    }
}

/// Trimmed, non-empty, bounded instance name.
fn validate_instance_name(raw: &str) -> Result<String, LifecycleError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(LifecycleError::Validation(
            "instance name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > 100 {
        return Err(LifecycleError::Validation(
            "instance name must not exceed 100 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}
