/// Database row types. These map directly to SQLite rows.
/// Distinct from loft-types API models to keep the DB layer independent.

pub struct ProfileRow {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: String,
    pub read_at: Option<String>,
}

pub struct ConversationRow {
    pub id: String,
    pub name: Option<String>,
    pub kind: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub last_read_at: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: String,
    pub edited: bool,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
}
