//! Browser-facing server: status queries, the relayed camera stream, and
//! the bidirectional console socket (events out, operator messages in).

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Map;
use tank_protocol::{CommandAck, ConsoleEvent, OperatorMessage, StatusResponse};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::autopilot::AutoPilot;
use crate::channel::{CommandChannel, SharedChannel};
use crate::observers::ObserverHub;

pub type SharedAutoPilot = Arc<AutoPilot<SharedChannel>>;

#[derive(Clone)]
pub struct ConsoleState {
    pub pilot: SharedAutoPilot,
    pub hub: Arc<ObserverHub>,
    pub channel: SharedChannel,
    pub frames: broadcast::Sender<Vec<u8>>,
}

pub fn app(state: ConsoleState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/status", get(status))
        .route("/ws/console", get(ws_console))
        .route("/ws/stream", get(ws_stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<ConsoleState>) -> Json<StatusResponse> {
    Json(state.pilot.status())
}

async fn ws_console(State(state): State<ConsoleState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_console(socket, state))
}

async fn handle_console(socket: WebSocket, state: ConsoleState) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.hub.subscribe();

    // Snapshot so a fresh page reflects the current controller state.
    let snapshot = state.pilot.status();
    let opening = [
        ConsoleEvent::AutoMovement {
            enabled: snapshot.auto_movement_enabled,
        },
        ConsoleEvent::TargetObjects {
            objects: snapshot.target_objects,
        },
    ];
    for event in opening {
        if send_json(&mut sink, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if send_json(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(ack) = handle_operator_message(&state, &text).await {
                        if send_json(&mut sink, &ack).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("console socket read failed: {e}");
                    break;
                }
            },
        }
    }
}

async fn send_json<T: serde::Serialize>(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(e) => {
            warn!("event serialization failed: {e}");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}

/// Apply one operator message. Malformed input is rejected here and never
/// reaches the controller. Returns an ack to answer on the same socket.
async fn handle_operator_message(state: &ConsoleState, text: &str) -> Option<CommandAck> {
    let message = match serde_json::from_str::<OperatorMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("malformed operator message: {e}");
            return Some(CommandAck::error(format!("malformed message: {e}")));
        }
    };

    match message {
        OperatorMessage::SetTargetObjects { objects } => {
            state.pilot.set_target_objects(&objects);
            state.hub.broadcast(ConsoleEvent::TargetObjects {
                objects: state.pilot.status().target_objects,
            });
            None
        }
        OperatorMessage::SetAutoMovement { enabled } => {
            state.pilot.set_enabled(enabled);
            state
                .hub
                .broadcast(ConsoleEvent::AutoMovement { enabled });
            None
        }
        OperatorMessage::Drive { command, speed } => {
            let mut params = Map::new();
            if let Some(speed) = speed {
                params.insert("speed".to_string(), speed.into());
            }
            match state.channel.send(&command, params).await {
                Ok(ack) => Some(ack),
                Err(e) => {
                    warn!("drive relay failed: {e}");
                    Some(CommandAck::error(e.to_string()))
                }
            }
        }
    }
}

async fn ws_stream(State(state): State<ConsoleState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(mut socket: WebSocket, state: ConsoleState) {
    let mut frames = state.frames.subscribe();
    loop {
        match frames.recv().await {
            Ok(frame) => {
                if socket.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            // Slow viewers skip frames instead of stalling the relay.
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
