//! Round stream over a real WebSocket connection.
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use wager_gateway::app::{build_app, build_engine_with};
use wager_gateway::app_state::AppState;
use wager_gateway::config::EngineConfig;
use wager_gateway::domain::{Currency, FixedOutcome, OperationType, UserId};
use wager_gateway::ledger::Posting;
use wager_gateway::service::{PlaceBetRequest, RoundEngine};
use wager_gateway::ws::BroadcastHub;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (String, RoundEngine) {
    let engine = build_engine_with(&EngineConfig::default(), Arc::new(FixedOutcome(dec!(1.03))));
    let hub = BroadcastHub::new(64);
    let _pump = hub.spawn_pump(engine.event_bus());
    let app = build_app(
        AppState {
            engine: engine.clone(),
            hub,
            persistence: None,
        },
        Duration::from_secs(5),
    );
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("ws://{addr}/ws"), engine)
}

async fn connect(url: &str) -> Socket {
    let Ok((socket, _)) = connect_async(url).await else {
        panic!("ws connect failed");
    };
    socket
}

async fn send(socket: &mut Socket, text: &str) {
    let Ok(()) = socket.send(Message::text(text)).await else {
        panic!("ws send failed");
    };
}

/// Reads messages until one of `kind` arrives.
async fn next_of(socket: &mut Socket, kind: &str) -> Value {
    let read = async {
        while let Some(Ok(message)) = socket.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                continue;
            };
            if value.get("type").and_then(Value::as_str) == Some(kind) {
                return value;
            }
        }
        panic!("socket closed before a {kind} message");
    };
    match tokio::time::timeout(Duration::from_secs(5), read).await {
        Ok(value) => value,
        Err(_) => panic!("no {kind} message within 5s"),
    }
}

fn usd() -> Currency {
    let Ok(c) = Currency::parse("USD") else {
        panic!("USD is a valid code");
    };
    c
}

#[tokio::test]
async fn commands_are_acknowledged() {
    let (url, _engine) = spawn_server().await;
    let mut socket = connect(&url).await;

    send(&mut socket, r#"{"command":"ping"}"#).await;
    let _ = next_of(&mut socket, "pong").await;

    send(&mut socket, r#"{"command":"subscribe","round_ids":["*"]}"#).await;
    let ack = next_of(&mut socket, "subscriptions").await;
    assert_eq!(ack.get("wildcard").and_then(Value::as_bool), Some(true));

    send(&mut socket, r#"{"command":"dance"}"#).await;
    let error = next_of(&mut socket, "error").await;
    assert_eq!(error.get("code").and_then(Value::as_u64), Some(400));
}

#[tokio::test]
async fn subscribers_follow_the_round_and_bettors_get_settlements() {
    let (url, engine) = spawn_server().await;
    let user = UserId::new();
    let deposit = Posting::new(user, usd(), dec!(100), OperationType::Deposit, "dep");
    let Ok(_) = engine.ledger().credit(deposit).await else {
        panic!("deposit failed");
    };

    let mut watcher = connect(&url).await;
    send(&mut watcher, r#"{"command":"subscribe","round_ids":["*"]}"#).await;
    let _ = next_of(&mut watcher, "subscriptions").await;
    let mut bettor = connect(&format!("{url}?user_id={user}")).await;
    send(&mut bettor, r#"{"command":"ping"}"#).await;
    let _ = next_of(&mut bettor, "pong").await;

    let Ok(round) = engine.open_round().await else {
        panic!("open failed");
    };
    let opened = next_of(&mut watcher, "round_state").await;
    assert_eq!(opened.get("status").and_then(Value::as_str), Some("open"));

    let request = PlaceBetRequest {
        user_id: user,
        currency: usd(),
        amount: dec!(10),
        client_tx_id: "w1".to_string(),
        auto_cashout: None,
    };
    let Ok(_) = engine.place_bet(round.id, request).await else {
        panic!("bet failed");
    };
    let Ok(_) = engine.start_round(round.id).await else {
        panic!("start failed");
    };
    let mut status = String::new();
    while status != "closed" {
        let Ok(snapshot) = engine.advance(round.id).await else {
            panic!("advance failed");
        };
        status = snapshot.status.to_string();
    }

    let crash = next_of(&mut bettor, "crash").await;
    assert_eq!(
        crash.get("round_id").and_then(Value::as_str),
        Some(round.id.to_string().as_str())
    );
    assert_eq!(crash.get("amount").and_then(Value::as_str), Some("10"));
    assert_eq!(crash.get("multiplier").and_then(Value::as_str), Some("1.03"));

    loop {
        let state = next_of(&mut watcher, "round_state").await;
        if state.get("status").and_then(Value::as_str) == Some("closed") {
            assert_eq!(state.get("outcome").and_then(Value::as_str), Some("1.03"));
            break;
        }
    }
}
