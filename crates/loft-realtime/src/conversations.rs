use uuid::Uuid;

use loft_types::api::UnreadByConversation;
use loft_types::models::{Conversation, Message};

use crate::events::ConversationPatch;

/// The session's conversation list, most recently updated first.
#[derive(Debug, Default, Clone)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    pub fn new(items: Vec<Conversation>) -> Self {
        let mut list = Self { items };
        list.sort();
        list
    }

    pub fn replace(&mut self, items: Vec<Conversation>) {
        self.items = items;
        self.sort();
    }

    pub fn as_slice(&self) -> &[Conversation] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    /// Known locally, and the participant list (when loaded) includes `user_id`.
    pub fn is_member(&self, id: Uuid, user_id: Uuid) -> bool {
        self.get(id)
            .is_some_and(|c| c.participants.is_empty() || c.has_participant(user_id))
    }

    /// Record a message from someone else. Returns the conversation's name,
    /// or `None` when the conversation is not in the list.
    pub fn apply_message(&mut self, message: &Message) -> Option<Option<String>> {
        let conversation = self.items.iter_mut().find(|c| c.id == message.conversation_id)?;
        conversation.unread_count = conversation.unread_count.saturating_add(1);
        self.record_message(message)
    }

    /// Like `apply_message` but leaves the unread count alone, for lists
    /// fetched after the message was stored.
    pub fn record_message(&mut self, message: &Message) -> Option<Option<String>> {
        let conversation = self.items.iter_mut().find(|c| c.id == message.conversation_id)?;
        conversation.last_message = Some(message.clone());
        conversation.updated_at = message.created_at;
        let name = conversation.name.clone();
        self.sort();
        Some(name)
    }

    /// Zero a conversation's unread count. Returns the previous count.
    pub fn mark_read(&mut self, id: Uuid) -> Option<u32> {
        let conversation = self.items.iter_mut().find(|c| c.id == id)?;
        Some(std::mem::take(&mut conversation.unread_count))
    }

    /// Overwrite per-conversation counts with server values; absent means 0.
    pub fn apply_unread(&mut self, unread: &UnreadByConversation) {
        for conversation in &mut self.items {
            conversation.unread_count = unread.get(&conversation.id).copied().unwrap_or(0);
        }
    }

    /// Merge a conversation update. Unread counts are left alone.
    pub fn apply_patch(&mut self, patch: &ConversationPatch) -> bool {
        let Some(conversation) = self.items.iter_mut().find(|c| c.id == patch.id) else {
            return false;
        };
        if let Some(name) = &patch.name {
            conversation.name = Some(name.clone());
        }
        if let Some(updated_at) = patch.updated_at {
            conversation.updated_at = updated_at;
        }
        self.sort();
        true
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
}
