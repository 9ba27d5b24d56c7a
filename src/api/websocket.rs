//! WebSocket transport for voice sessions

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::ApiState;
use crate::session::{Inbound, Outbound, OutboundFrame, Session};

/// Frames buffered between a session and its socket writer
const OUTBOUND_CAPACITY: usize = 32;

/// How long teardown waits for queued frames to flush
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Optional query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
struct WsQuery {
    language: Option<String>,
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let language = query
        .language
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| state.session.language.clone());
    ws.on_upgrade(move |socket| handle_socket(socket, state, language))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, language: String) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut rx) = Outbound::channel(OUTBOUND_CAPACITY);

    // Forward queued frames to the socket until a close frame goes out
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, OutboundFrame::Close { .. });
            let Some(message) = frame_to_message(frame) else {
                continue;
            };
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let mut session = Session::new(
        language,
        outbound.clone(),
        Arc::clone(&state.pipeline),
        state.session.max_history,
    );
    let session_id = session.id();
    state
        .registry
        .register(session_id, outbound, session.language().to_string())
        .await;
    let _ = session.announce().await;

    tracing::info!(
        session_id = %session_id,
        language = %session.language(),
        "WebSocket connected"
    );

    let mut writer_done = false;
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(message)) => match message_to_inbound(message) {
                    Incoming::Inbound(inbound) => {
                        let _ = session.dispatch(inbound).await;
                    }
                    Incoming::Close => {
                        tracing::info!(session_id = %session_id, "WebSocket closed by client");
                        break;
                    }
                    Incoming::Skip => {}
                },
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            },
            _ = &mut send_task => {
                writer_done = true;
                break;
            }
        }
    }

    state.registry.remove(&session_id).await;
    session.close().await;
    drop(session);

    if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut send_task).await.is_err() {
        send_task.abort();
    }

    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}

/// Classified inbound WebSocket message
#[derive(Debug)]
enum Incoming {
    Inbound(Inbound),
    Close,
    Skip,
}

fn message_to_inbound(message: Message) -> Incoming {
    match message {
        Message::Text(text) => Incoming::Inbound(Inbound::parse(text.as_str())),
        Message::Binary(data) => Incoming::Inbound(Inbound::AudioFrame(data)),
        Message::Close(_) => Incoming::Close,
        Message::Ping(data) => {
            // axum answers pings automatically
            tracing::trace!(len = data.len(), "received ping");
            Incoming::Skip
        }
        Message::Pong(_) => Incoming::Skip,
    }
}

fn frame_to_message(frame: OutboundFrame) -> Option<Message> {
    match frame {
        OutboundFrame::Envelope(envelope) => match serde_json::to_string(&envelope) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize envelope");
                None
            }
        },
        OutboundFrame::Audio(audio) => Some(Message::Binary(audio.into())),
        OutboundFrame::Close { reason } => Some(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: reason.into(),
        }))),
    }
}
