//! Subscriptions to the change channel and the reconnect loop around them.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use loft_types::events::{ColumnFilter, RawChange, Table};

use crate::config::ReconnectPolicy;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// One logical stream: a table, optionally narrowed by a row filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub name: &'static str,
    pub table: Table,
    pub filter: Option<ColumnFilter>,
}

type Closer = Box<dyn FnOnce() + Send>;

/// Changes of one established subscription, in delivery order.
pub struct ChangeStream {
    rx: mpsc::Receiver<RawChange>,
    closer: Option<Closer>,
}

impl ChangeStream {
    pub fn new(rx: mpsc::Receiver<RawChange>, closer: Option<Closer>) -> Self {
        Self { rx, closer }
    }

    /// `None` once the underlying channel is gone.
    pub async fn next(&mut self) -> Option<RawChange> {
        self.rx.recv().await
    }

    /// Release the subscription. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        self.rx.close();
        if let Some(close) = self.closer.take() {
            close();
        }
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Opens subscriptions on the change channel. Resolves once the channel has
/// acknowledged the subscription.
pub trait RealtimeTransport: Send + Sync {
    fn subscribe<'a>(&'a self, spec: &'a SubscriptionSpec) -> BoxFuture<'a, Result<ChangeStream>>;
}

/// Keep `spec` subscribed until `cancel` fires, feeding every change to
/// `on_change`. Failed or dropped subscriptions are retried with backoff;
/// after `policy.max_retries` consecutive failures the loop gives up and
/// the session lives on the pull cycle alone.
pub async fn run_subscription<F>(
    spec: SubscriptionSpec,
    transport: Arc<dyn RealtimeTransport>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    state: watch::Sender<SubscriptionState>,
    mut on_change: F,
) where
    F: FnMut(RawChange) + Send,
{
    let mut failures: u32 = 0;

    loop {
        state.send_replace(SubscriptionState::Subscribing);
        let subscribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = transport.subscribe(&spec) => result,
        };

        match subscribed {
            Ok(mut stream) => {
                state.send_replace(SubscriptionState::Subscribed);
                info!(subscription = spec.name, table = spec.table.as_str(), "subscribed");
                failures = 0;

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            stream.unsubscribe();
                            state.send_replace(SubscriptionState::Unsubscribed);
                            info!(subscription = spec.name, "unsubscribed");
                            return;
                        }
                        change = stream.next() => match change {
                            Some(change) => on_change(change),
                            None => break,
                        },
                    }
                }
                warn!(subscription = spec.name, "change stream closed");
            }
            Err(e) => {
                warn!(subscription = spec.name, "subscription failed: {}", e);
            }
        }

        state.send_replace(SubscriptionState::Unsubscribed);
        failures += 1;
        if failures > policy.max_retries {
            warn!(
                subscription = spec.name,
                failures, "giving up on realtime, relying on the pull cycle"
            );
            return;
        }

        let delay = policy.delay(failures);
        info!(subscription = spec.name, attempt = failures, ?delay, "reconnecting");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state.send_replace(SubscriptionState::Unsubscribed);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use loft_types::events::ChangeKind;

    use super::*;
    use crate::testing::ChannelTransport;

    fn spec() -> SubscriptionSpec {
        SubscriptionSpec {
            name: "messages",
            table: Table::Messages,
            filter: None,
        }
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let (_tx, rx) = mpsc::channel(1);
        let closed = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = closed.clone();
        let mut stream = ChangeStream::new(
            rx,
            Some(Box::new(move || {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })),
        );
        stream.unsubscribe();
        stream.unsubscribe();
        drop(stream);
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_changes_in_order_until_cancelled() {
        let transport = Arc::new(ChannelTransport::default());
        let cancel = CancellationToken::new();
        let (state_tx, mut state_rx) = watch::channel(SubscriptionState::Unsubscribed);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_subscription(
            spec(),
            transport.clone(),
            ReconnectPolicy::default(),
            cancel.clone(),
            state_tx,
            move |change: RawChange| {
                let _ = seen_tx.send(change.new["n"].as_u64().unwrap_or_default());
            },
        ));

        state_rx.wait_for(|s| *s == SubscriptionState::Subscribed).await.unwrap();
        for n in 1..=3 {
            transport.push(Table::Messages, ChangeKind::Insert, json!({ "n": n })).await;
        }
        for expected in 1..=3 {
            assert_eq!(seen_rx.recv().await, Some(expected));
        }

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*state_rx.borrow(), SubscriptionState::Unsubscribed);
        assert_eq!(transport.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let transport = Arc::new(ChannelTransport::failing(u32::MAX));
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Unsubscribed);
        let policy = ReconnectPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(4),
            max_retries: 3,
        };

        run_subscription(spec(), transport.clone(), policy, CancellationToken::new(), state_tx, |_| {})
            .await;

        assert_eq!(transport.attempts(), 4);
        assert_eq!(*state_rx.borrow(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = Arc::new(ChannelTransport::failing(2));
        let cancel = CancellationToken::new();
        let (state_tx, mut state_rx) = watch::channel(SubscriptionState::Unsubscribed);

        let task = tokio::spawn(run_subscription(
            spec(),
            transport.clone(),
            ReconnectPolicy::default(),
            cancel.clone(),
            state_tx,
            |_| {},
        ));

        state_rx.wait_for(|s| *s == SubscriptionState::Subscribed).await.unwrap();
        assert_eq!(transport.attempts(), 3);

        cancel.cancel();
        task.await.unwrap();
    }
}
