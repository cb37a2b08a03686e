use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use loft_types::events::{ChangeKind, ColumnFilter, RawChange, Table};

/// Who may receive a change. Computed server-side at publish time, so
/// clients never see rows they could not read through the API.
#[derive(Debug, Clone)]
pub enum Audience {
    Everyone,
    Users(Arc<HashSet<Uuid>>),
}

impl Audience {
    pub fn users(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self::Users(Arc::new(ids.into_iter().collect()))
    }

    pub fn includes(&self, user_id: Uuid) -> bool {
        match self {
            Self::Everyone => true,
            Self::Users(ids) => ids.contains(&user_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEnvelope {
    pub change: RawChange,
    pub audience: Audience,
}

impl ChangeEnvelope {
    /// True when a subscription of `user_id` on `table` (+ `filter`) should
    /// receive this change.
    pub fn matches(&self, user_id: Uuid, table: Table, filter: Option<&ColumnFilter>) -> bool {
        self.change.table == table
            && self.audience.includes(user_id)
            && filter.is_none_or(|f| f.matches(&self.change.new))
    }
}

/// Tracks connected clients and broadcasts row changes.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for changes; every connection filters for itself
    broadcast_tx: broadcast::Sender<ChangeEnvelope>,

    /// conn_id -> user_id
    connections: RwLock<HashMap<Uuid, Uuid>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to row changes. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEnvelope> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a change. Returns the number of live receivers.
    pub fn publish(&self, envelope: ChangeEnvelope) -> usize {
        self.inner.broadcast_tx.send(envelope).unwrap_or(0)
    }

    /// A notification insert is visible to its owner only.
    pub fn notification_inserted(&self, owner: Uuid, row: Value) -> usize {
        self.publish(ChangeEnvelope {
            change: RawChange {
                table: Table::Notifications,
                kind: ChangeKind::Insert,
                new: row,
                old: None,
            },
            audience: Audience::users([owner]),
        })
    }

    /// A message insert is visible to the conversation's participants.
    pub fn message_inserted(&self, participants: impl IntoIterator<Item = Uuid>, row: Value) -> usize {
        self.publish(ChangeEnvelope {
            change: RawChange {
                table: Table::Messages,
                kind: ChangeKind::Insert,
                new: row,
                old: None,
            },
            audience: Audience::users(participants),
        })
    }

    pub fn conversation_updated(
        &self,
        participants: impl IntoIterator<Item = Uuid>,
        row: Value,
    ) -> usize {
        self.publish(ChangeEnvelope {
            change: RawChange {
                table: Table::Conversations,
                kind: ChangeKind::Update,
                new: row,
                old: None,
            },
            audience: Audience::users(participants),
        })
    }

    pub async fn register_connection(&self, user_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.connections.write().await.insert(conn_id, user_id);
        conn_id
    }

    pub async fn unregister_connection(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Distinct users with at least one open connection.
    pub async fn connected_users(&self) -> Vec<Uuid> {
        let connections = self.inner.connections.read().await;
        let unique: HashSet<Uuid> = connections.values().copied().collect();
        unique.into_iter().collect()
    }
}
