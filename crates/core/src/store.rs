//! ConversationStore trait: persistence for conversations and their messages.
//!
//! The store is deliberately ownership-agnostic. Access control happens in the
//! orchestration facade, which loads a conversation and checks its owner
//! before touching its messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId, ConversationStatus, ConversationUpdate, Message, UserId};

/// Filter for listing a user's conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationQuery {
    pub user_id: UserId,

    /// Only return conversations with this status. `None` returns everything
    /// except deleted conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,

    #[serde(default)]
    pub offset: usize,

    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

impl ConversationQuery {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            status: None,
            offset: 0,
            limit: default_limit(),
        }
    }

    pub fn with_status(mut self, status: ConversationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Whether a conversation passes this query's user and status filter.
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if conversation.user_id != self.user_id {
            return false;
        }
        match self.status {
            Some(status) => conversation.status == status,
            None => conversation.status != ConversationStatus::Deleted,
        }
    }
}

/// The core ConversationStore trait.
///
/// Implementations: SQLite, in-memory (for testing and ephemeral runs).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Persist a new conversation row.
    async fn create_conversation(&self, conversation: Conversation) -> std::result::Result<Conversation, StoreError>;

    /// Load a conversation by ID.
    async fn get_conversation(&self, id: &ConversationId) -> std::result::Result<Option<Conversation>, StoreError>;

    /// List conversations, most recently active first.
    async fn list_conversations(&self, query: ConversationQuery) -> std::result::Result<Vec<Conversation>, StoreError>;

    /// All messages of a conversation in creation order.
    async fn list_messages(&self, id: &ConversationId) -> std::result::Result<Vec<Message>, StoreError>;

    /// Append one message. Fails with `NotFound` if the conversation does not exist.
    async fn append_message(&self, id: &ConversationId, message: Message) -> std::result::Result<(), StoreError>;

    /// Apply a partial metadata update and return the updated row.
    async fn update_conversation_meta(
        &self,
        id: &ConversationId,
        update: ConversationUpdate,
    ) -> std::result::Result<Conversation, StoreError>;

    /// Hard delete a conversation and its messages. Returns whether a row existed.
    async fn delete_conversation(&self, id: &ConversationId) -> std::result::Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_exclude_deleted() {
        let user = UserId::from("alice");
        let query = ConversationQuery::for_user(user.clone());
        assert_eq!(query.limit, 20);

        let mut conv = Conversation::new(user.clone(), "t");
        assert!(query.matches(&conv));
        conv.status = ConversationStatus::Deleted;
        assert!(!query.matches(&conv));
    }

    #[test]
    fn query_filters_by_owner_and_status() {
        let query = ConversationQuery::for_user(UserId::from("alice")).with_status(ConversationStatus::Archived);
        let mut conv = Conversation::new(UserId::from("alice"), "t");
        assert!(!query.matches(&conv));
        conv.status = ConversationStatus::Archived;
        assert!(query.matches(&conv));

        let other = Conversation::new(UserId::from("bob"), "t");
        assert!(!query.matches(&other));
    }
}
