use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{
    AutoMessage, ChatMessage, Conversation, MessageType, NewAutoMessage, User,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn list_active(&self) -> anyhow::Result<Vec<User>>;
    async fn get(&self, id: &Uuid) -> anyhow::Result<Option<User>>;
    async fn upsert(&self, user: &User) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AutoMessageRepository: Send + Sync {
    /// Persists the whole batch in one call. All-or-nothing: a failure
    /// leaves none of the batch behind.
    async fn insert_batch(&self, batch: Vec<NewAutoMessage>) -> anyhow::Result<Vec<AutoMessage>>;

    /// Pending records whose send date has passed, in send-date order.
    async fn list_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<AutoMessage>>;

    async fn mark_queued(&self, id: Uuid, queued_at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AutoMessage>>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Returns the conversation for the unordered participant pair,
    /// creating it exactly once if absent.
    async fn get_or_create(&self, a: Uuid, b: Uuid) -> anyhow::Result<Conversation>;

    /// Inserts a message and advances the conversation's last-message
    /// pointer in the same operation.
    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: String,
        message_type: MessageType,
    ) -> anyhow::Result<ChatMessage>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Conversation>>;

    async fn list_messages(&self, conversation_id: Uuid) -> anyhow::Result<Vec<ChatMessage>>;
}
