//! WebSocket sample stream.
//!
//! Each socket registers one viewer with the broadcast hub and forwards its
//! outbox as JSON text frames. Any text the client sends is a keepalive and
//! is answered with `{"type":"heartbeat"}` through the same outbox.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;

use pulsewatch_core::{HubMessage, SampleRecord, heartbeat_frame};

use crate::AppState;

pub(crate) async fn handle_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, state))
}

fn render(message: &HubMessage, sampling_rate: f64) -> Option<String> {
    match message {
        HubMessage::Sample(sample) => {
            serde_json::to_string(&SampleRecord::new(sample, sampling_rate)).ok()
        }
        HubMessage::Heartbeat => Some(heartbeat_frame()),
    }
}

async fn serve_viewer(mut socket: WebSocket, state: Arc<AppState>) {
    let hub = Arc::clone(state.pipeline.hub());
    let sampling_rate = state.pipeline.config().sampling_rate;
    let mut viewer = hub.register();
    let id = viewer.id;

    loop {
        tokio::select! {
            outgoing = viewer.outbox.recv() => {
                let Some(message) = outgoing else { break };
                let Some(text) = render(&message, sampling_rate) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    log::debug!("viewer {id}: send failed");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                        if let Err(e) = hub.acknowledge_heartbeat(id) {
                            log::debug!("heartbeat ack failed: {e}");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("viewer {id}: receive error: {e}");
                        break;
                    }
                }
            }
        }
    }

    hub.unregister(id);
}
