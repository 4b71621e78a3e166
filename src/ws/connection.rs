//! WebSocket connection loop.
//!
//! Reads client commands and forwards the connection's hub messages to the
//! socket. The hub side never waits on the socket; lag is logged and the
//! oldest messages are gone.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use super::hub::BroadcastHub;
use super::messages::{ClientCommand, ServerMessage};
use crate::domain::{ConnectionId, RoundId, UserId};

/// Runs one connection until the client leaves or the hub drops it.
pub async fn run_connection(socket: WebSocket, hub: BroadcastHub, user_id: Option<UserId>) {
    let (id, mut outbound) = hub.register(user_id).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_command(&hub, id, &text).await;
                    if !send(&mut ws_tx, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            message = outbound.recv() => match message {
                Ok(message) => {
                    if !send(&mut ws_tx, &message).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(connection_id = %id, missed, "stream client lagged; oldest messages dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    hub.unregister(id).await;
    tracing::debug!(connection_id = %id, "ws connection closed");
}

async fn send<S>(ws_tx: &mut S, message: &ServerMessage) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
{
    let Ok(json) = serde_json::to_string(message) else {
        return true;
    };
    ws_tx.send(Message::text(json)).await.is_ok()
}

/// Applies one client command and returns the reply.
async fn handle_command(hub: &BroadcastHub, id: ConnectionId, text: &str) -> ServerMessage {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => return ServerMessage::error(400, format!("unrecognized command: {e}")),
    };
    let updated = match command {
        ClientCommand::Ping => return ServerMessage::Pong,
        ClientCommand::Subscribe { round_ids } => match parse_targets(&round_ids) {
            Ok((ids, wildcard)) => hub.subscribe(id, &ids, wildcard).await,
            Err(bad) => return ServerMessage::error(400, format!("invalid round id {bad:?}")),
        },
        ClientCommand::Unsubscribe { round_ids } => match parse_targets(&round_ids) {
            Ok((ids, wildcard)) => hub.unsubscribe(id, &ids, wildcard).await,
            Err(bad) => return ServerMessage::error(400, format!("invalid round id {bad:?}")),
        },
    };
    match updated {
        Some((count, wildcard)) => ServerMessage::Subscriptions { count, wildcard },
        None => ServerMessage::error(410, "connection is closed"),
    }
}

/// Splits `["*", "<uuid>", ...]` into explicit ids and the wildcard flag.
fn parse_targets(raw: &[String]) -> Result<(Vec<RoundId>, bool), String> {
    let mut ids = Vec::with_capacity(raw.len());
    let mut wildcard = false;
    for value in raw {
        if value == "*" {
            wildcard = true;
        } else {
            ids.push(value.parse().map_err(|_| value.clone())?);
        }
    }
    Ok((ids, wildcard))
}
