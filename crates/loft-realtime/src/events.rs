use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use loft_types::events::{ChangeKind, RawChange, Table};
use loft_types::models::{Message, Notification, NotificationKind};

use crate::error::{RealtimeError, Result};

/// Fields of a conversation update the client merges into its list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationPatch {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A change event, validated against its table's row shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NotificationInsert(Notification),
    MessageInsert(Message),
    ConversationUpdate(ConversationPatch),
}

impl RealtimeEvent {
    /// Parse a raw change. Changes the layer does not react to yield `None`;
    /// a reacted-to change whose row is malformed is an error.
    pub fn from_change(change: RawChange) -> Result<Option<Self>> {
        let table = change.table.as_str();
        let invalid = |e: serde_json::Error| RealtimeError::InvalidPayload {
            table,
            reason: e.to_string(),
        };

        let event = match (change.table, change.kind) {
            (Table::Notifications, ChangeKind::Insert) => {
                Self::NotificationInsert(serde_json::from_value(change.new).map_err(invalid)?)
            }
            (Table::Messages, ChangeKind::Insert) => {
                Self::MessageInsert(serde_json::from_value(change.new).map_err(invalid)?)
            }
            (Table::Conversations, ChangeKind::Update) => {
                Self::ConversationUpdate(serde_json::from_value(change.new).map_err(invalid)?)
            }
            (other, kind) => {
                // Notification updates (read flags) never touch the counters;
                // the next pull picks them up.
                trace!(table = other.as_str(), ?kind, "ignoring change");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}

/// In-process events for other parts of the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "detail", rename_all = "kebab-case")]
pub enum AppEvent {
    NotificationReceived {
        #[serde(rename = "type")]
        kind: NotificationKind,
        count: u32,
    },
    NewMessageReceived {
        message: Message,
        sender_name: String,
        conversation_name: String,
    },
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotificationReceived { .. } => "notification-received",
            Self::NewMessageReceived { .. } => "new-message-received",
        }
    }
}

/// Fan-out of [`AppEvent`]s to any number of in-process listeners.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of listeners reached. Nobody listening is fine.
    pub fn publish(&self, event: AppEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn change(table: Table, kind: ChangeKind, new: serde_json::Value) -> RawChange {
        RawChange { table, kind, new, old: None }
    }

    #[test]
    fn notification_insert_defaults_kind_to_info() {
        let id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let event = RealtimeEvent::from_change(change(
            Table::Notifications,
            ChangeKind::Insert,
            json!({
                "id": id,
                "user_id": user,
                "title": "Bill due",
                "message": "Electricity, Loft 2",
                "created_at": "2025-03-01T09:00:00Z"
            }),
        ))
        .unwrap();

        let Some(RealtimeEvent::NotificationInsert(n)) = event else {
            panic!("expected a notification insert, got {event:?}");
        };
        assert_eq!(n.kind, NotificationKind::Info);
        assert!(!n.is_read);
    }

    #[test]
    fn malformed_rows_fail_fast() {
        let err = RealtimeEvent::from_change(change(
            Table::Messages,
            ChangeKind::Insert,
            json!({ "id": "nope" }),
        ))
        .unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidPayload { table: "messages", .. }));
    }

    #[test]
    fn notification_updates_are_ignored() {
        let event = RealtimeEvent::from_change(change(
            Table::Notifications,
            ChangeKind::Update,
            json!({ "is_read": true }),
        ))
        .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn app_events_use_kebab_case_names() {
        let event = AppEvent::NotificationReceived {
            kind: NotificationKind::Warning,
            count: 3,
        };
        assert_eq!(event.name(), "notification-received");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "notification-received", "detail": { "type": "warning", "count": 3 } })
        );
    }

    #[test]
    fn bus_without_listeners_drops_silently() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(AppEvent::NotificationReceived { kind: NotificationKind::Info, count: 1 }), 0);

        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(AppEvent::NotificationReceived { kind: NotificationKind::Info, count: 2 }), 1);
        assert!(matches!(rx.try_recv(), Ok(AppEvent::NotificationReceived { count: 2, .. })));
    }
}
