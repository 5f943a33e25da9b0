//! Status reconciler
//!
//! Trues up local belief about connection status against live provider
//! truth. Two modes: a bulk all-settled sweep over a workspace, and the
//! single probe the pairing watcher runs.

use std::sync::Arc;

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::connection::Model as Connection;
use crate::providers::registry::ProviderRegistry;
use crate::providers::status::ConnectionStatus;
use crate::providers::trait_::{ProviderError, StatusProbe};
use crate::repositories::connection::ConnectionStore;

/// Aggregate outcome of a bulk sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
}

impl SyncOutcome {
    /// User-facing notification for this outcome.
    pub fn user_message(self) -> &'static str {
        match self {
            SyncOutcome::AllSucceeded => "Todas as conexões foram atualizadas.",
            SyncOutcome::Partial => "Algumas conexões não puderam ser atualizadas.",
            SyncOutcome::AllFailed => "Não foi possível atualizar as conexões.",
        }
    }
}

/// One successfully trued-up connection.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncUpdate {
    pub connection_id: Uuid,
    pub status: ConnectionStatus,
    /// Whether the probe changed the persisted status
    pub changed: bool,
}

/// One connection the sweep could not reach.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncFailure {
    pub connection_id: Uuid,
    pub error: String,
}

/// Partitioned result of a bulk sync.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncReport {
    pub updated: Vec<SyncUpdate>,
    pub failed: Vec<SyncFailure>,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    fn from_parts(updated: Vec<SyncUpdate>, failed: Vec<SyncFailure>) -> Self {
        let outcome = if failed.is_empty() {
            SyncOutcome::AllSucceeded
        } else if updated.is_empty() {
            SyncOutcome::AllFailed
        } else {
            SyncOutcome::Partial
        };
        Self {
            updated,
            failed,
            outcome,
        }
    }
}

/// Reconciles persisted status against live provider status.
pub struct StatusReconciler {
    store: Arc<dyn ConnectionStore>,
    registry: Arc<ProviderRegistry>,
    concurrency: usize,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        registry: Arc<ProviderRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Probe every given connection once, concurrently, with all-settled
    /// semantics: one failing probe never aborts the batch. Updates are
    /// applied only for the successful subset.
    #[instrument(skip_all, fields(connections = connections.len()))]
    pub async fn sync_all(&self, connections: Vec<Connection>) -> SyncReport {
        if connections.is_empty() {
            return SyncReport::from_parts(Vec::new(), Vec::new());
        }

        let started = std::time::Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(connections.len());

        for connection in connections {
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed while syncing");
                Self::sync_one(store, registry, connection).await
            }));
        }

        let mut updated = Vec::new();
        let mut failed = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(update)) => updated.push(update),
                Ok(Err(failure)) => failed.push(failure),
                Err(join_err) => {
                    // A panicked probe counts as a failed item, not a failed batch.
                    warn!(error = %join_err, "Status probe task panicked");
                }
            }
        }

        histogram!("connection_sync_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!("connection_sync_updated_total").increment(updated.len() as u64);
        counter!("connection_sync_failed_total").increment(failed.len() as u64);

        SyncReport::from_parts(updated, failed)
    }

    async fn sync_one(
        store: Arc<dyn ConnectionStore>,
        registry: Arc<ProviderRegistry>,
        connection: Connection,
    ) -> Result<SyncUpdate, SyncFailure> {
        let connection_id = connection.id;

        let probe = Self::probe(&registry, &connection)
            .await
            .map_err(|err| SyncFailure {
                connection_id,
                error: err.to_string(),
            })?;

        let changed = connection.status != probe.status.as_str();
        let mut row = connection;
        row.status = probe.status.as_str().to_string();
        if let Some(phone) = probe.phone_number {
            row.phone_number = Some(phone);
        }
        // qr_code is only meaningful while status is qr
        if probe.status != ConnectionStatus::Qr {
            row.qr_code = None;
        }

        store.upsert(row).await.map_err(|err| SyncFailure {
            connection_id,
            error: err.to_string(),
        })?;

        debug!(
            connection_id = %connection_id,
            status = %probe.status,
            changed,
            "Connection status reconciled"
        );

        Ok(SyncUpdate {
            connection_id,
            status: probe.status,
            changed,
        })
    }

    /// Single live probe, used by the pairing watcher. Whether a
    /// `disconnected` reading means anything is the caller's business; the
    /// very first poll after opening a session is not trustworthy for that.
    pub async fn check_once(&self, connection: &Connection) -> Result<StatusProbe, ProviderError> {
        Self::probe(&self.registry, connection).await
    }

    async fn probe(
        registry: &ProviderRegistry,
        connection: &Connection,
    ) -> Result<StatusProbe, ProviderError> {
        let adapter = registry
            .resolve_for(connection)
            .map_err(|err| ProviderError::NotConfigured {
                details: err.to_string(),
            })?;
        adapter.get_status(connection).await
    }
}
