use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt, stream::SplitStream};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::ClientMessage,
    services::{events, participation, public_service},
    state::{ConnectionId, SharedState, Subscription},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let Some(user_id) = identify(&mut receiver, &outbound_tx).await else {
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let subscription = register(&state, &user_id);
    let connection = subscription.id();
    info!(user_id = %user_id, connection = %connection, "player connected");

    let forwarder = tokio::spawn(forward_events(subscription, outbound_tx.clone()));

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(message) => dispatch(&state, connection, &user_id, message).await,
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "failed to parse or validate player message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(user_id = %user_id, "player closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.hub().disconnect(connection);
    forwarder.abort();
    info!(user_id = %user_id, connection = %connection, "player disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Wait for the identification frame. Returns `None` when the socket must be torn down.
async fn identify(
    receiver: &mut SplitStream<WebSocket>,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) -> Option<String> {
    let text = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => return None,
        Ok(Some(Ok(_))) => {
            warn!("first frame was not text; closing");
            let _ = outbound_tx.send(Message::Close(None));
            return None;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error before identification");
            return None;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            return None;
        }
    };

    match ClientMessage::from_json_str(&text) {
        Ok(ClientMessage::Identification { user_id }) => Some(user_id),
        Ok(_) => {
            warn!("first message was not identification; closing");
            let _ = outbound_tx.send(Message::Close(None));
            None
        }
        Err(err) => {
            warn!(error = %err, "rejected identification; closing");
            let _ = outbound_tx.send(Message::Close(None));
            None
        }
    }
}

async fn dispatch(
    state: &SharedState,
    connection: ConnectionId,
    user_id: &str,
    message: ClientMessage,
) {
    match message {
        ClientMessage::JoinGameSession { session_id } => {
            // Rejections are already reported to the caller and logged.
            let _ = participation::join(state, connection, user_id, session_id).await;
        }
        ClientMessage::SelectNumberInGameSession { session_id, number } => {
            let _ =
                participation::select_number(state, connection, user_id, session_id, number).await;
        }
        ClientMessage::SessionInit => {
            events::send_session_init(state, connection, &public_service::current_state(state));
        }
        ClientMessage::Identification { .. } => {
            warn!(user_id, "ignoring duplicate identification message");
        }
        ClientMessage::Unknown => {
            debug!(user_id, "ignoring unknown message type");
        }
    }
}

/// Subscribe an identified player and queue the current-state snapshot as its first event.
pub fn register(state: &SharedState, user_id: &str) -> Subscription {
    let subscription = state.hub().connect(user_id);
    events::send_session_init(state, subscription.id(), &public_service::current_state(state));
    subscription
}

/// Pump hub events into the socket writer until either side goes away.
async fn forward_events(mut subscription: Subscription, tx: mpsc::UnboundedSender<Message>) {
    while let Some(event) = subscription.recv().await {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event = event.event, error = %err, "failed to serialize outbound event");
                continue;
            }
        };
        if tx.send(Message::Text(payload.into())).is_err() {
            break;
        }
    }
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
