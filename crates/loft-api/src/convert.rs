//! Row → API model conversion. Corrupt columns are logged and replaced
//! with defaults rather than failing the whole response.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use loft_db::models::{ConversationRow, MessageRow, NotificationRow, ParticipantRow};
use loft_types::models::{
    Conversation, ConversationKind, ConversationParticipant, Message, MessageType, Notification,
    NotificationKind, ParticipantRole, Profile,
};

fn uuid_or_default(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn timestamp_or_default(raw: &str, what: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite defaults use "YYYY-MM-DD HH:MM:SS" without timezone.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}': {}", what, raw, e);
            DateTime::default()
        })
}

pub fn notification(row: &NotificationRow) -> Notification {
    Notification {
        id: uuid_or_default(&row.id, "notification id"),
        user_id: uuid_or_default(&row.user_id, "notification user_id"),
        title: row.title.clone(),
        message: row.message.clone(),
        kind: NotificationKind::from_str_lossy(&row.kind),
        link: row.link.clone(),
        is_read: row.is_read,
        created_at: timestamp_or_default(&row.created_at, "notification created_at"),
        read_at: row
            .read_at
            .as_deref()
            .map(|raw| timestamp_or_default(raw, "notification read_at")),
    }
}

pub fn message(row: &MessageRow) -> Message {
    let sender_id = uuid_or_default(&row.sender_id, "message sender_id");
    Message {
        id: uuid_or_default(&row.id, "message id"),
        conversation_id: uuid_or_default(&row.conversation_id, "message conversation_id"),
        sender_id,
        content: row.content.clone(),
        message_type: MessageType::parse(&row.message_type).unwrap_or_default(),
        created_at: timestamp_or_default(&row.created_at, "message created_at"),
        edited: row.edited,
        sender: row.sender_name.as_ref().map(|full_name| Profile {
            id: sender_id,
            full_name: full_name.clone(),
            email: row.sender_email.clone(),
        }),
    }
}

pub fn participant(row: &ParticipantRow) -> ConversationParticipant {
    let user_id = uuid_or_default(&row.user_id, "participant user_id");
    ConversationParticipant {
        conversation_id: uuid_or_default(&row.conversation_id, "participant conversation_id"),
        user_id,
        role: ParticipantRole::parse(&row.role).unwrap_or_default(),
        last_read_at: row
            .last_read_at
            .as_deref()
            .map(|raw| timestamp_or_default(raw, "participant last_read_at")),
        user: row.full_name.as_ref().map(|full_name| Profile {
            id: user_id,
            full_name: full_name.clone(),
            email: row.email.clone(),
        }),
    }
}

pub fn conversation(
    row: &ConversationRow,
    participants: Vec<ConversationParticipant>,
    last_message: Option<Message>,
    unread_count: u32,
) -> Conversation {
    Conversation {
        id: uuid_or_default(&row.id, "conversation id"),
        name: row.name.clone(),
        kind: ConversationKind::parse(&row.kind).unwrap_or_default(),
        created_at: timestamp_or_default(&row.created_at, "conversation created_at"),
        updated_at: timestamp_or_default(&row.updated_at, "conversation updated_at"),
        last_message,
        participants,
        unread_count,
    }
}
