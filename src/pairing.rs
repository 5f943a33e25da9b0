//! QR pairing sessions
//!
//! One session per connection being paired: it owns a cancellable watcher
//! task that polls the provider through the reconciler and drives the
//! {awaiting_scan, connected, expired, error} state machine. Sessions are
//! cancelled when the pairing UI is dismissed or a terminal state is
//! reached; re-opening a session for the same connection cancels the
//! previous watcher first, so watchers never leak across repeated opens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::PairingConfig;
use crate::error::LifecycleError;
use crate::events::{ConnectionEvent, EventBus};
use crate::models::connection::Model as Connection;
use crate::providers::registry::ProviderRegistry;
use crate::providers::status::ConnectionStatus;
use crate::reconciler::StatusReconciler;
use crate::repositories::connection::ConnectionStore;
use crate::retry::{ErrorClass, classify};

/// Pairing session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    AwaitingScan,
    Connected,
    Expired,
    Error,
}

/// Transition produced by applying one status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Transition {
    Connected,
    Expired,
}

/// The pure state machine. Separated from the watcher task so transitions
/// are testable without timers or providers.
#[derive(Debug)]
struct WatchState {
    state: PairingState,
    successful_checks: u32,
}

impl WatchState {
    fn new() -> Self {
        Self {
            state: PairingState::AwaitingScan,
            successful_checks: 0,
        }
    }

    /// Apply one successful probe. Returns the transition it caused, if
    /// any. Repeated `connected` probes after the first are no-ops.
    fn apply_probe(&mut self, status: ConnectionStatus) -> Option<Transition> {
        if self.state != PairingState::AwaitingScan {
            return None;
        }

        let transition = match status {
            ConnectionStatus::Connected => {
                self.state = PairingState::Connected;
                Some(Transition::Connected)
            }
            // The very first poll can read disconnected before the provider
            // has initialized the pairing session; only a later reading
            // means the code expired.
            ConnectionStatus::Disconnected if self.successful_checks > 0 => {
                self.state = PairingState::Expired;
                Some(Transition::Expired)
            }
            _ => None,
        };

        self.successful_checks += 1;
        transition
    }

    /// The remote instance no longer exists; terminal from any state.
    fn apply_gone(&mut self) -> bool {
        if self.state == PairingState::Error {
            return false;
        }
        self.state = PairingState::Error;
        true
    }
}

/// Shared view of a session, readable while the watcher runs.
struct SessionShared {
    watch: WatchState,
    qr_code: Option<String>,
}

struct SessionEntry {
    cancel: CancellationToken,
    shared: Arc<StdMutex<SessionShared>>,
}

/// Snapshot of a pairing session for the UI.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PairingSnapshot {
    #[schema(value_type = String)]
    pub connection_id: Uuid,
    pub state: PairingState,
    pub qr_code: Option<String>,
}

/// Everything a watcher task owns; cloned out of the manager so the task
/// does not borrow it.
#[derive(Clone)]
struct WatcherCtx {
    store: Arc<dyn ConnectionStore>,
    reconciler: Arc<StatusReconciler>,
    events: EventBus,
    poll_interval: Duration,
    jitter_factor: f64,
}

impl WatcherCtx {
    /// The watcher loop. Runs until cancelled or a terminal transition.
    async fn watch(
        self,
        connection: Connection,
        shared: Arc<StdMutex<SessionShared>>,
        cancel: CancellationToken,
    ) {
        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(connection_id = %connection.id, "Pairing watcher cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            counter!("pairing_checks_total").increment(1);

            match self.reconciler.check_once(&connection).await {
                Ok(probe) => {
                    let transition = shared
                        .lock()
                        .expect("pairing session lock poisoned")
                        .watch
                        .apply_probe(probe.status);

                    match transition {
                        Some(Transition::Connected) => {
                            self.complete_connected(&connection, &shared, probe.phone_number)
                                .await;
                            cancel.cancel();
                            return;
                        }
                        Some(Transition::Expired) => {
                            self.complete_expired(&connection, &shared).await;
                            cancel.cancel();
                            return;
                        }
                        None => {}
                    }
                }
                Err(err) if classify(&err) == ErrorClass::NotFound => {
                    self.complete_gone(&connection, &shared, err.to_string()).await;
                    cancel.cancel();
                    return;
                }
                Err(err) => {
                    // Transient probe failures do not end the session.
                    warn!(
                        connection_id = %connection.id,
                        error = %err,
                        "Pairing status probe failed, will retry"
                    );
                }
            }
        }
    }


    /// Fresh row for a terminal update; edits made during pairing survive.
    async fn fresh_row(&self, connection: &Connection) -> Connection {
        match self.store.get(connection.id).await {
            Ok(Some(row)) => row,
            _ => connection.clone(),
        }
    }

    /// Device linked. Persist, notify once, close the session.
    async fn complete_connected(
        &self,
        connection: &Connection,
        shared: &Arc<StdMutex<SessionShared>>,
        phone_number: Option<String>,
    ) {
        shared
            .lock()
            .expect("pairing session lock poisoned")
            .qr_code = None;

        let phone = phone_number.or_else(|| connection.phone_number.clone());

        let mut row = self.fresh_row(connection).await;
        row.status = ConnectionStatus::Connected.as_str().to_string();
        row.qr_code = None;
        row.phone_number = phone.clone();
        if let Err(err) = self.store.upsert(row).await {
            error!(
                connection_id = %connection.id,
                error = ?err,
                "Failed to persist paired connection"
            );
        }

        counter!("pairing_sessions_connected_total").increment(1);
        info!(
            connection_id = %connection.id,
            phone = phone.as_deref().unwrap_or(""),
            "Pairing completed"
        );

        let display = phone.unwrap_or_else(|| connection.instance_name.clone());
        self.events.publish(ConnectionEvent::Paired {
            workspace_id: connection.workspace_id,
            connection_id: connection.id,
            phone_number: display.clone(),
            message: format!("WhatsApp conectado como {}!", display),
        });
        self.events.publish(ConnectionEvent::StatusChanged {
            workspace_id: connection.workspace_id,
            connection_id: connection.id,
            status: ConnectionStatus::Connected,
        });
    }

    /// The QR code expired before being scanned.
    async fn complete_expired(
        &self,
        connection: &Connection,
        shared: &Arc<StdMutex<SessionShared>>,
    ) {
        shared
            .lock()
            .expect("pairing session lock poisoned")
            .qr_code = None;

        let mut row = self.fresh_row(connection).await;
        row.status = ConnectionStatus::Disconnected.as_str().to_string();
        row.qr_code = None;
        if let Err(err) = self.store.upsert(row).await {
            error!(
                connection_id = %connection.id,
                error = ?err,
                "Failed to persist expired pairing"
            );
        }

        counter!("pairing_sessions_expired_total").increment(1);
        self.events.publish(ConnectionEvent::PairingExpired {
            workspace_id: connection.workspace_id,
            connection_id: connection.id,
        });
        self.events.publish(ConnectionEvent::StatusChanged {
            workspace_id: connection.workspace_id,
            connection_id: connection.id,
            status: ConnectionStatus::Disconnected,
        });
    }

    /// The remote instance no longer exists.
    async fn complete_gone(
        &self,
        connection: &Connection,
        shared: &Arc<StdMutex<SessionShared>>,
        reason: String,
    ) {
        {
            let mut guard = shared.lock().expect("pairing session lock poisoned");
            if !guard.watch.apply_gone() {
                return;
            }
            guard.qr_code = None;
        }

        let mut row = self.fresh_row(connection).await;
        row.status = ConnectionStatus::Error.as_str().to_string();
        row.qr_code = None;
        if let Err(err) = self.store.upsert(row).await {
            error!(
                connection_id = %connection.id,
                error = ?err,
                "Failed to persist missing-instance state"
            );
        }

        counter!("pairing_sessions_failed_total").increment(1);
        warn!(
            connection_id = %connection.id,
            reason = %reason,
            "Remote instance disappeared during pairing"
        );

        // Clients reload the connection list on this event.
        self.events.publish(ConnectionEvent::PairingFailed {
            workspace_id: connection.workspace_id,
            connection_id: connection.id,
            reason,
        });
    }

    fn next_delay(&self) -> Duration {
        if self.jitter_factor <= 0.0 {
            return self.poll_interval;
        }
        let max_jitter = self.poll_interval.as_secs_f64() * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=max_jitter);
        self.poll_interval + Duration::from_secs_f64(jitter)
    }
}

/// Owns every active pairing session and its watcher task.
pub struct QrSessionManager {
    store: Arc<dyn ConnectionStore>,
    registry: Arc<ProviderRegistry>,
    reconciler: Arc<StatusReconciler>,
    events: EventBus,
    poll_interval: Duration,
    jitter_factor: f64,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl QrSessionManager {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        registry: Arc<ProviderRegistry>,
        reconciler: Arc<StatusReconciler>,
        events: EventBus,
        config: &PairingConfig,
    ) -> Self {
        Self {
            store,
            registry,
            reconciler,
            events,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            jitter_factor: config.jitter_factor,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn watcher_ctx(&self) -> WatcherCtx {
        WatcherCtx {
            store: Arc::clone(&self.store),
            reconciler: Arc::clone(&self.reconciler),
            events: self.events.clone(),
            poll_interval: self.poll_interval,
            jitter_factor: self.jitter_factor,
        }
    }

    /// Open a pairing session for `connection` with the current QR payload
    /// attached, spawning the status watcher. An existing session for the
    /// same connection is cancelled first.
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn open(&self, connection: Connection, qr_code: String) {
        let shared = Arc::new(StdMutex::new(SessionShared {
            watch: WatchState::new(),
            qr_code: Some(qr_code),
        }));
        let cancel = CancellationToken::new();

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(previous) = sessions.remove(&connection.id) {
                debug!("Cancelling previous pairing session before reopening");
                previous.cancel.cancel();
            }
            sessions.insert(
                connection.id,
                SessionEntry {
                    cancel: cancel.clone(),
                    shared: Arc::clone(&shared),
                },
            );
        }

        counter!("pairing_sessions_opened_total").increment(1);
        info!("Pairing session opened");

        let ctx = self.watcher_ctx();
        tokio::spawn(ctx.watch(connection, shared, cancel));
    }

    /// User-driven QR refresh while awaiting scan.
    pub async fn refresh(&self, connection: &Connection) -> Result<String, LifecycleError> {
        {
            let sessions = self.sessions.lock().await;
            let entry = sessions.get(&connection.id).ok_or_else(|| {
                LifecycleError::NotFound("no pairing session for this connection".to_string())
            })?;
            let guard = entry.shared.lock().expect("pairing session lock poisoned");
            if guard.watch.state != PairingState::AwaitingScan {
                return Err(LifecycleError::Validation(
                    "pairing session is no longer awaiting a scan".to_string(),
                ));
            }
        }

        let adapter = self.registry.resolve_for(connection)?;
        let qr_code = match adapter.refresh_qr_code(connection).await {
            Ok(qr) => qr,
            Err(err) if classify(&err) == ErrorClass::NotFound => {
                // Same teardown as the watcher's 404 path.
                if let Some(shared) = self.shared_for(connection.id).await {
                    self.watcher_ctx()
                        .complete_gone(connection, &shared, err.to_string())
                        .await;
                }
                self.close(connection.id).await;
                return Err(LifecycleError::from_provider(err));
            }
            Err(err) => return Err(LifecycleError::from_provider(err)),
        };

        let mut row = connection.clone();
        row.status = ConnectionStatus::Qr.as_str().to_string();
        row.qr_code = Some(qr_code.clone());
        self.store
            .upsert(row)
            .await
            .map_err(LifecycleError::from_store)?;

        if let Some(shared) = self.shared_for(connection.id).await {
            shared
                .lock()
                .expect("pairing session lock poisoned")
                .qr_code = Some(qr_code.clone());
        }

        counter!("pairing_qr_refreshes_total").increment(1);
        Ok(qr_code)
    }

    /// Stop watching and drop the session (pairing UI dismissed).
    pub async fn close(&self, connection_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.remove(&connection_id) {
            entry.cancel.cancel();
            debug!(connection_id = %connection_id, "Pairing session closed");
        }
    }

    /// Current snapshot of a session, if one exists.
    pub async fn snapshot(&self, connection_id: Uuid) -> Option<PairingSnapshot> {
        let sessions = self.sessions.lock().await;
        sessions.get(&connection_id).map(|entry| {
            let guard = entry.shared.lock().expect("pairing session lock poisoned");
            PairingSnapshot {
                connection_id,
                state: guard.watch.state,
                qr_code: guard.qr_code.clone(),
            }
        })
    }

    async fn shared_for(&self, connection_id: Uuid) -> Option<Arc<StdMutex<SessionShared>>> {
        let sessions = self.sessions.lock().await;
        sessions.get(&connection_id).map(|e| Arc::clone(&e.shared))
    }
}
