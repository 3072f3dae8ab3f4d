//! In-memory store, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use parley_core::error::StoreError;
use parley_core::message::{Conversation, ConversationId, ConversationUpdate, Message};
use parley_core::store::{ConversationQuery, ConversationStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

/// Keeps conversations and their messages in process memory.
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation, StoreError> {
        let mut state = self.state.write().await;
        if state.conversations.contains_key(&conversation.id) {
            return Err(StoreError::Storage(format!("conversation {} already exists", conversation.id)));
        }
        state.conversations.insert(conversation.id.clone(), conversation.clone());
        state.messages.insert(conversation.id.clone(), Vec::new());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.state.read().await.conversations.get(id).cloned())
    }

    async fn list_conversations(&self, query: ConversationQuery) -> Result<Vec<Conversation>, StoreError> {
        let state = self.state.read().await;
        let mut results: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| query.matches(c))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            let a_active = a.last_message_at.unwrap_or(a.created_at);
            let b_active = b.last_message_at.unwrap_or(b.created_at);
            b_active.cmp(&a_active).then(b.created_at.cmp(&a.created_at))
        });

        Ok(results.into_iter().skip(query.offset).take(query.limit).collect())
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        Ok(self.state.read().await.messages.get(id).cloned().unwrap_or_default())
    }

    async fn append_message(&self, id: &ConversationId, message: Message) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.conversations.contains_key(id) {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        state.messages.entry(id.clone()).or_default().push(message);
        Ok(())
    }

    async fn update_conversation_meta(
        &self,
        id: &ConversationId,
        update: ConversationUpdate,
    ) -> Result<Conversation, StoreError> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;

        if let Some(title) = update.title {
            conversation.title = title;
        }
        if let Some(status) = update.status {
            conversation.status = status;
        }
        if let Some(count) = update.message_count {
            conversation.message_count = count;
        }
        if let Some(tokens) = update.total_tokens {
            conversation.total_tokens = tokens;
        }
        if let Some(at) = update.last_message_at {
            conversation.last_message_at = Some(at);
        }
        conversation.updated_at = Utc::now();

        Ok(conversation.clone())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.messages.remove(id);
        Ok(state.conversations.remove(id).is_some())
    }
}
