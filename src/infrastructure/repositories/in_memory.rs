use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    errors::DomainError,
    models::{
        AutoMessage, AutoMessageStatus, ChatMessage, Conversation, MessageType, NewAutoMessage,
        User,
    },
    repositories::{AutoMessageRepository, ConversationRepository, UserRepository},
};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn list_active(&self) -> anyhow::Result<Vec<User>> {
        let users = self.users.read().await;
        let mut active: Vec<User> = users.values().filter(|u| u.is_active).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn get(&self, id: &Uuid) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(id).cloned())
    }

    async fn upsert(&self, user: &User) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        users.insert(user.id, user.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAutoMessageRepository {
    messages: Arc<RwLock<HashMap<Uuid, AutoMessage>>>,
}

impl InMemoryAutoMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Test support: rewinds a record's send date so a scan sees it as due.
    pub async fn set_send_date(&self, id: Uuid, send_date: DateTime<Utc>) {
        if let Some(record) = self.messages.write().await.get_mut(&id) {
            record.send_date = send_date;
        }
    }
}

#[async_trait]
impl AutoMessageRepository for InMemoryAutoMessageRepository {
    async fn insert_batch(&self, batch: Vec<NewAutoMessage>) -> anyhow::Result<Vec<AutoMessage>> {
        let now = Utc::now();
        let mut messages = self.messages.write().await;
        let mut inserted = Vec::with_capacity(batch.len());
        for new in batch {
            let record = AutoMessage {
                id: Uuid::new_v4(),
                sender_id: new.sender_id,
                receiver_id: new.receiver_id,
                content: new.content,
                send_date: new.send_date,
                status: AutoMessageStatus::Pending,
                created_at: now,
            };
            messages.insert(record.id, record.clone());
            inserted.push(record);
        }
        Ok(inserted)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<AutoMessage>> {
        let messages = self.messages.read().await;
        let mut due: Vec<AutoMessage> = messages
            .values()
            .filter(|m| m.status.is_pending() && m.send_date <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.send_date.cmp(&b.send_date));
        Ok(due)
    }

    async fn mark_queued(&self, id: Uuid, queued_at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut messages = self.messages.write().await;
        let record = messages
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("auto message {id}")))?;
        if !record.status.is_pending() {
            return Err(DomainError::InvalidState(format!("auto message {id} is not pending")).into());
        }
        record.status = AutoMessageStatus::Queued { queued_at };
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut messages = self.messages.write().await;
        let record = messages
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("auto message {id}")))?;
        let AutoMessageStatus::Queued { queued_at } = record.status else {
            return Err(DomainError::InvalidState(format!("auto message {id} is not queued")).into());
        };
        record.status = AutoMessageStatus::Sent { queued_at, sent_at };
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AutoMessage>> {
        let messages = self.messages.read().await;
        Ok(messages.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: Arc<RwLock<HashMap<(Uuid, Uuid), Conversation>>>,
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn get_or_create(&self, a: Uuid, b: Uuid) -> anyhow::Result<Conversation> {
        let pair = Conversation::normalize_pair(a, b);
        let mut conversations = self.conversations.write().await;
        if let Some(existing) = conversations.get(&pair) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participant_a: pair.0,
            participant_b: pair.1,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };
        conversations.insert(pair, conversation.clone());
        Ok(conversation)
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: String,
        message_type: MessageType,
    ) -> anyhow::Result<ChatMessage> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .values_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| DomainError::NotFound(format!("conversation {conversation_id}")))?;

        let now = Utc::now();
        let message = ChatMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            body,
            message_type,
            created_at: now,
        };
        conversation.last_message_id = Some(message.id);
        conversation.updated_at = now;

        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations.values().find(|c| c.id == id).cloned())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> anyhow::Result<Vec<ChatMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
