//! Connection change notifications.
//!
//! The controller is the source of truth; the UI subscribes to this bus
//! (over SSE) instead of holding its own mutable connection list. Every
//! mutation and every pairing transition is published here.

use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::providers::status::ConnectionStatus;
use crate::reconciler::SyncOutcome;

/// Events published by the lifecycle engine.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Created {
        workspace_id: Uuid,
        connection_id: Uuid,
    },
    Updated {
        workspace_id: Uuid,
        connection_id: Uuid,
    },
    Deleted {
        workspace_id: Uuid,
        connection_id: Uuid,
    },
    StatusChanged {
        workspace_id: Uuid,
        connection_id: Uuid,
        status: ConnectionStatus,
    },
    DefaultChanged {
        workspace_id: Uuid,
        connection_id: Uuid,
    },
    /// Creation retry feedback ("attempt N of M")
    CreateRetrying {
        workspace_id: Uuid,
        attempt: u32,
        max_attempts: u32,
    },
    /// Device link succeeded; fired exactly once per pairing session
    Paired {
        workspace_id: Uuid,
        connection_id: Uuid,
        phone_number: String,
        message: String,
    },
    /// The QR code expired before being scanned
    PairingExpired {
        workspace_id: Uuid,
        connection_id: Uuid,
    },
    /// The remote instance vanished mid-pairing; clients must reload
    PairingFailed {
        workspace_id: Uuid,
        connection_id: Uuid,
        reason: String,
    },
    SyncCompleted {
        workspace_id: Uuid,
        outcome: SyncOutcome,
        message: String,
    },
}

impl ConnectionEvent {
    /// Workspace the event belongs to, for per-workspace SSE filtering.
    pub fn workspace_id(&self) -> Uuid {
        match self {
            ConnectionEvent::Created { workspace_id, .. }
            | ConnectionEvent::Updated { workspace_id, .. }
            | ConnectionEvent::Deleted { workspace_id, .. }
            | ConnectionEvent::StatusChanged { workspace_id, .. }
            | ConnectionEvent::DefaultChanged { workspace_id, .. }
            | ConnectionEvent::CreateRetrying { workspace_id, .. }
            | ConnectionEvent::Paired { workspace_id, .. }
            | ConnectionEvent::PairingExpired { workspace_id, .. }
            | ConnectionEvent::PairingFailed { workspace_id, .. }
            | ConnectionEvent::SyncCompleted { workspace_id, .. } => *workspace_id,
        }
    }
}

/// Broadcast bus for [`ConnectionEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn publish(&self, event: ConnectionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let workspace_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();
        bus.publish(ConnectionEvent::Created {
            workspace_id,
            connection_id,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.workspace_id(), workspace_id);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(ConnectionEvent::Deleted {
            workspace_id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ConnectionEvent::StatusChanged {
            workspace_id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            status: ConnectionStatus::Connected,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status_changed\""));
        assert!(json.contains("\"status\":\"connected\""));
    }
}
