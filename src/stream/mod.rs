//! C12 — Streaming Dispatcher: forwards one request's event bus to one
//! WebSocket client, enforcing a bounded outbound queue (backpressure) and
//! propagating client disconnect as cancellation upstream.

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::models::PipelineEvent;
use crate::pipeline::events::EventBus;

const SEND_QUEUE_DEPTH: usize = 128;

/// Drains `bus` onto `socket` until a terminal event is sent, the socket
/// closes, or the client falls behind (`error(backpressure)` and close).
pub async fn dispatch(
    mut socket: WebSocket,
    bus: EventBus,
    mut receiver: broadcast::Receiver<PipelineEvent>,
    cancellation: CancellationToken,
) {
    let established = bus.wrap(PipelineEvent::ConnectionEstablished);
    if send_event(&mut socket, &established).await.is_err() {
        cancellation.cancel();
        return;
    }

    let mut lagging_tolerance = SEND_QUEUE_DEPTH;

    loop {
        tokio::select! {
            biased;

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        cancellation.cancel();
                        return;
                    },
                    Some(Err(_)) => {
                        cancellation.cancel();
                        return;
                    },
                    _ => continue,
                }
            }

            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        let wire = bus.wrap(event);
                        if send_event(&mut socket, &wire).await.is_err() {
                            cancellation.cancel();
                            return;
                        }
                        if terminal {
                            return;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        lagging_tolerance = lagging_tolerance.saturating_sub(1);
                        if lagging_tolerance == 0 {
                            let backpressure = bus.wrap(PipelineEvent::Error {
                                kind: "backpressure".to_string(),
                                message: "client too slow".to_string(),
                            });
                            let _ = send_event(&mut socket, &backpressure).await;
                            cancellation.cancel();
                            return;
                        }
                    },
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

async fn send_event(
    socket: &mut WebSocket,
    event: &crate::models::WireEvent,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(payload)).await
}
