use crate::models::{ConversationRow, MessageRow, NotificationRow, ParticipantRow, ProfileRow};
use crate::{Database, now_timestamp};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.content, m.message_type, \
     m.created_at, m.edited, p.full_name, p.email";

impl Database {
    // -- Profiles --

    pub fn upsert_profile(&self, id: &str, full_name: &str, email: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, full_name, email) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET full_name = excluded.full_name, email = excluded.email",
                rusqlite::params![id, full_name, email],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, full_name, email FROM profiles WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(ProfileRow {
                            id: row.get(0)?,
                            full_name: row.get(1)?,
                            email: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
        message: &str,
        kind: &str,
        link: Option<&str>,
    ) -> Result<NotificationRow> {
        let created_at = now_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, title, message, type, link, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, user_id, title, message, kind, link, created_at],
            )?;
            Ok(NotificationRow {
                id: id.to_string(),
                user_id: user_id.to_string(),
                title: title.to_string(),
                message: message.to_string(),
                kind: kind.to_string(),
                link: link.map(str::to_string),
                is_read: false,
                created_at: created_at.clone(),
                read_at: None,
            })
        })
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, title, message, type, link, is_read, created_at, read_at
                     FROM notifications WHERE id = ?1",
                    [id],
                    map_notification,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn count_unread_notifications(&self, user_id: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Returns false when the notification does not exist, belongs to
    /// someone else, or was already read.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?3
                 WHERE id = ?1 AND user_id = ?2 AND is_read = 0",
                rusqlite::params![id, user_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<u32> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?2
                 WHERE user_id = ?1 AND is_read = 0",
                rusqlite::params![user_id, now],
            )?;
            Ok(changed as u32)
        })
    }

    // -- Conversations --

    /// Create a conversation and its participant rows in one transaction.
    pub fn create_conversation(
        &self,
        id: &str,
        name: Option<&str>,
        kind: &str,
        participants: &[(&str, &str)],
    ) -> Result<()> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, name, type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id, name, kind, now],
            )?;
            for (user_id, role) in participants {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, user_id, role, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| query_is_participant(conn, conversation_id, user_id))
    }

    /// True when both users belong to at least one common conversation.
    pub fn shares_conversation(&self, user_id: &str, other_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants a
                     JOIN conversation_participants b ON b.conversation_id = a.conversation_id
                     WHERE a.user_id = ?1 AND b.user_id = ?2
                     LIMIT 1",
                    [user_id, other_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn participant_ids(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1",
            )?;
            let ids = stmt
                .query_map([conversation_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    /// Sets `last_read_at` to now. Returns false when the user is not a
    /// participant of the conversation.
    pub fn mark_conversation_read(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversation_participants SET last_read_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id, user_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, type, created_at, updated_at FROM conversations WHERE id = ?1",
                    [id],
                    map_conversation,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Conversations the user participates in, most recently active first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.type, c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_participants(&self, conversation_id: &str) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cp.conversation_id, cp.user_id, cp.role, cp.last_read_at, p.full_name, p.email
                 FROM conversation_participants cp
                 LEFT JOIN profiles p ON p.id = cp.user_id
                 WHERE cp.conversation_id = ?1
                 ORDER BY cp.joined_at",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(ParticipantRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: row.get(2)?,
                        last_read_at: row.get(3)?,
                        full_name: row.get(4)?,
                        email: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message and bump the conversation's `updated_at`.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        message_type: &str,
    ) -> Result<MessageRow> {
        let created_at = now_timestamp();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, message_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, conversation_id, sender_id, content, message_type, created_at],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![conversation_id, created_at],
            )?;
            let row = tx.query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages m
                     LEFT JOIN profiles p ON p.id = m.sender_id
                     WHERE m.id = ?1"
                ),
                [id],
                map_message,
            )?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn last_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages m
                         LEFT JOIN profiles p ON p.id = m.sender_id
                         WHERE m.conversation_id = ?1
                         ORDER BY m.created_at DESC LIMIT 1"
                    ),
                    [conversation_id],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Messages from others newer than the user's `last_read_at`, summed
    /// over every conversation the user participates in.
    pub fn count_unread_messages(&self, user_id: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 JOIN conversation_participants cp
                   ON cp.conversation_id = m.conversation_id AND cp.user_id = ?1
                 WHERE m.sender_id != ?1
                   AND m.created_at > COALESCE(cp.last_read_at, '')",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Unread count per conversation. Every conversation of the user is
    /// present, with 0 when nothing is unread.
    pub fn unread_by_conversation(&self, user_id: &str) -> Result<Vec<(String, u32)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cp.conversation_id, COUNT(m.id)
                 FROM conversation_participants cp
                 LEFT JOIN messages m
                   ON m.conversation_id = cp.conversation_id
                  AND m.sender_id != cp.user_id
                  AND m.created_at > COALESCE(cp.last_read_at, '')
                 WHERE cp.user_id = ?1
                 GROUP BY cp.conversation_id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_is_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            [conversation_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        kind: row.get(4)?,
        link: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
        read_at: row.get(8)?,
    })
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        message_type: row.get(4)?,
        created_at: row.get(5)?,
        edited: row.get(6)?,
        sender_name: row.get(7)?,
        sender_email: row.get(8)?,
    })
}
