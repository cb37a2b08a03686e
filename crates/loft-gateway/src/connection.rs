use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use loft_types::api::Claims;
use loft_types::events::{ColumnFilter, GatewayCommand, GatewayEvent, Table};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Subscriptions of one connection: sub_id -> (table, filter).
type SubscriptionMap = Arc<std::sync::RwLock<HashMap<u32, (Table, Option<ColumnFilter>)>>>;

/// Validate a bearer token and return its claims.
pub fn authenticate(token: &str, jwt_secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Handle a WebSocket connection whose token was already validated at the
/// HTTP upgrade layer.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    let conn_id = dispatcher.register_connection(user_id).await;
    info!(%user_id, %conn_id, "connected to realtime gateway");

    let mut broadcast_rx = dispatcher.subscribe();

    // Replies to commands (acks, errors) go through this channel so only the
    // send task ever writes to the socket.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let subscriptions: SubscriptionMap = Arc::new(std::sync::RwLock::new(HashMap::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let envelope = match result {
                        Ok(envelope) => envelope,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // Dropped changes are healed by the clients' pull cycle
                            warn!(%user_id, "change receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let matching: Vec<u32> = match send_subscriptions.read() {
                        Ok(subs) => subs
                            .iter()
                            .filter(|(_, (table, filter))| envelope.matches(user_id, *table, filter.as_ref()))
                            .map(|(sub_id, _)| *sub_id)
                            .collect(),
                        Err(_) => break,
                    };

                    for sub_id in matching {
                        let event = GatewayEvent::Change { sub_id, change: envelope.change.clone() };
                        if !send_event(&mut sender, &event).await {
                            return;
                        }
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(%user_id, "heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        let reply = handle_command(user_id, cmd, &recv_subscriptions);
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            %user_id,
                            "bad command: {} -- raw: {}",
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let _ = reply_tx.send(GatewayEvent::Error {
                            sub_id: None,
                            message: e.to_string(),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_connection(conn_id).await;
    info!(%user_id, %conn_id, "disconnected from realtime gateway");
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

fn handle_command(user_id: Uuid, cmd: GatewayCommand, subscriptions: &SubscriptionMap) -> GatewayEvent {
    let Ok(mut subs) = subscriptions.write() else {
        return GatewayEvent::Error {
            sub_id: None,
            message: "subscription state unavailable".into(),
        };
    };

    match cmd {
        GatewayCommand::Subscribe { sub_id, table, filter } => {
            debug!(
                %user_id,
                sub_id,
                table = table.as_str(),
                filter = filter.as_ref().map(|f| f.to_string()).unwrap_or_default(),
                "subscribe"
            );
            subs.insert(sub_id, (table, filter));
            GatewayEvent::Subscribed { sub_id }
        }
        GatewayCommand::Unsubscribe { sub_id } => {
            debug!(%user_id, sub_id, "unsubscribe");
            subs.remove(&sub_id);
            GatewayEvent::Unsubscribed { sub_id }
        }
    }
}
