use std::sync::Arc;

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use serde::Serialize;
use tokio::sync::broadcast;
use trip_safety_lib::{
    emergency_alert::EmergencyAlert, participant::ParticipantTracking, tracking_session::SessionStatus,
};

use crate::{routes::ApiError, server_state::ServerState};

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A delta produced by one committed session mutation. Every subscriber of
/// the trip's channel sees these in commit order; anyone who misses one
/// re-pulls the session snapshot, which is the system of record.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionInitialized { trip_id: i64, status: SessionStatus },
    SessionStatusChanged { trip_id: i64, status: SessionStatus },
    ParticipantUpdated { trip_id: i64, participant: ParticipantTracking },
    AlertRaised { trip_id: i64, alert: EmergencyAlert },
    AlertUpdated { trip_id: i64, alert: EmergencyAlert },
    AlertResolved { trip_id: i64, alert_id: i64 },
}

impl SessionEvent {
    pub fn trip_id(&self) -> i64 {
        match self {
            SessionEvent::SessionInitialized { trip_id, .. }
            | SessionEvent::SessionStatusChanged { trip_id, .. }
            | SessionEvent::ParticipantUpdated { trip_id, .. }
            | SessionEvent::AlertRaised { trip_id, .. }
            | SessionEvent::AlertUpdated { trip_id, .. }
            | SessionEvent::AlertResolved { trip_id, .. } => *trip_id,
        }
    }
}

/// Live-update channel for one trip's dashboard.
pub async fn live_updates(
    ws: WebSocketUpgrade,
    Path(trip_id): Path<i64>,
    State(state): State<Arc<ServerState>>,
) -> Result<Response, ApiError> {
    // Subscribing to a trip without a session is a 404, not a silent
    // channel that never speaks.
    state.engine.snapshot(trip_id).await?;

    let receiver = state.engine.subscribe();
    Ok(ws.on_upgrade(move |socket| forward_session_events(socket, receiver, trip_id)))
}

async fn forward_session_events(
    mut socket: WebSocket,
    mut receiver: broadcast::Receiver<SessionEvent>,
    trip_id: i64,
) {
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) if event.trip_id() == trip_id => {
                    let Ok(payload) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Dropped events are recoverable through the pull path.
                    tracing::warn!("Subscriber for trip {} lagged {} events", trip_id, missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                // Nothing flows client -> server on this channel.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }

    tracing::debug!("Live subscriber for trip {} disconnected", trip_id);
}
