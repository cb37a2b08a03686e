use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use loft_types::events::{GatewayCommand, GatewayEvent};

use crate::error::{RealtimeError, Result};
use crate::subscription::{ChangeStream, RealtimeTransport, SubscriptionSpec};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CHANGE_BUFFER: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`RealtimeTransport`] over the gateway's WebSocket endpoint. Each
/// subscription gets its own socket, so one failing stream never takes
/// the others down.
pub struct WsTransport {
    url: String,
    access_token: String,
    next_sub_id: AtomicU32,
}

impl WsTransport {
    /// `url` is the gateway endpoint, e.g. `ws://127.0.0.1:3210/realtime`.
    pub fn new(url: &str, access_token: &str) -> Self {
        Self {
            url: url.to_string(),
            access_token: access_token.to_string(),
            next_sub_id: AtomicU32::new(1),
        }
    }

    fn endpoint(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.url, separator, self.access_token)
    }
}

impl RealtimeTransport for WsTransport {
    fn subscribe<'a>(&'a self, spec: &'a SubscriptionSpec) -> BoxFuture<'a, Result<ChangeStream>> {
        Box::pin(async move {
            let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
            let (socket, _) = connect_async(self.endpoint()).await?;
            let (mut sink, mut stream) = socket.split();

            let command = GatewayCommand::Subscribe {
                sub_id,
                table: spec.table,
                filter: spec.filter.clone(),
            };
            sink.send(Message::Text(serde_json::to_string(&command)?.into()))
                .await?;

            tokio::time::timeout(HANDSHAKE_TIMEOUT, await_ack(&mut stream, sub_id))
                .await
                .map_err(|_| RealtimeError::Subscribe("handshake timed out".into()))??;
            debug!(sub_id, table = spec.table.as_str(), "gateway acknowledged subscription");

            let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
            let name = spec.name;
            let reader = tokio::spawn(async move {
                // Keep the write half alive for as long as we read.
                let _sink = sink;
                while let Some(frame) = stream.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(subscription = name, "realtime socket error: {}", e);
                            break;
                        }
                    };
                    match serde_json::from_str::<GatewayEvent>(&text) {
                        Ok(GatewayEvent::Change { sub_id: id, change }) if id == sub_id => {
                            if tx.send(change).await.is_err() {
                                break;
                            }
                        }
                        Ok(GatewayEvent::Error { message, .. }) => {
                            warn!(subscription = name, "gateway error: {}", message);
                        }
                        Ok(other) => trace!(subscription = name, ?other, "ignoring gateway event"),
                        Err(e) => warn!(subscription = name, "undecodable gateway event: {}", e),
                    }
                }
                debug!(subscription = name, "realtime socket closed");
            });

            Ok(ChangeStream::new(rx, Some(Box::new(move || reader.abort()))))
        })
    }
}

async fn await_ack(stream: &mut SplitStream<Socket>, sub_id: u32) -> Result<()> {
    while let Some(frame) = stream.next().await {
        let Message::Text(text) = frame? else { continue };
        match serde_json::from_str::<GatewayEvent>(&text)? {
            GatewayEvent::Subscribed { sub_id: id } if id == sub_id => return Ok(()),
            GatewayEvent::Error { message, .. } => return Err(RealtimeError::Subscribe(message)),
            _ => {}
        }
    }
    Err(RealtimeError::Subscribe("socket closed during handshake".into()))
}
