//! # Event Stream Handler
//!
//! Server-sent event stream of connection change notifications, filtered to
//! the caller's workspace. The UI subscribes here instead of owning its own
//! mutable connection list.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::auth::WorkspaceExtension;
use crate::server::AppState;

/// Streams workspace connection events as SSE
#[utoipa::path(
    get,
    path = "/connections/events",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "SSE stream of connection events")
    ),
    tag = "connections"
)]
pub async fn connection_events(
    State(state): State<AppState>,
    WorkspaceExtension(workspace): WorkspaceExtension,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let workspace_id = workspace.0;
    let receiver = state.controller.events().subscribe();

    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        // Lagged receivers drop messages; clients resync via the list call.
        let event = item.ok()?;
        if event.workspace_id() != workspace_id {
            return None;
        }
        let json = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
