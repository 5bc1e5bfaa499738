//! `GET /search/stream?client_id=…` — the WebSocket entrypoint.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::models::QueryRequest;
use crate::pipeline::events::EventBus;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[allow(dead_code)]
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SearchRequest {
        query: String,
        #[serde(default)]
        context: std::collections::BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        options: crate::models::QueryOptions,
    },
}

pub async fn stream_search(
    State(state): State<AppState>,
    Query(_params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    use axum::extract::ws::Message;

    let Some(Ok(Message::Text(text))) = socket.recv().await else {
        let _ = socket.close().await;
        return;
    };

    let Ok(ClientMessage::SearchRequest { query, context, options }) =
        serde_json::from_str::<ClientMessage>(&text)
    else {
        let _ = socket.close().await;
        return;
    };

    let request = QueryRequest { query, context, options, user_id: None };
    let request_id = uuid::Uuid::new_v4().to_string();
    let bus = EventBus::new(request_id);
    let cancellation = CancellationToken::new();
    let receiver = bus.subscribe();

    let pipeline = state.pipeline.clone();
    let sender = bus.sender();
    let run_cancellation = cancellation.clone();
    tokio::spawn(async move {
        let _ = pipeline.run(request, sender, run_cancellation).await;
    });

    crate::stream::dispatch(socket, bus, receiver, cancellation).await;
}
