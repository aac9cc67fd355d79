use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::{
    application::services::live_session::LiveSessionNotifier,
    domain::{
        events::AutoMessageQueuedEvent,
        models::MessageType,
        repositories::{AutoMessageRepository, ConversationRepository},
    },
};

/// Handler invoked for each payload delivered off the durable queue.
#[async_trait]
pub trait QueuedEventHandler: Send + Sync {
    async fn handle(&self, event: AutoMessageQueuedEvent) -> anyhow::Result<()>;
}

/// Turns a queued payload into durable, visible chat state: conversation,
/// message, realtime push, and the Queued -> Sent transition, in that order.
pub struct AutoMessageDispatchHandler {
    conversation_repo: Arc<dyn ConversationRepository>,
    auto_repo: Arc<dyn AutoMessageRepository>,
    notifier: Arc<dyn LiveSessionNotifier>,
}

impl AutoMessageDispatchHandler {
    pub fn new(
        conversation_repo: Arc<dyn ConversationRepository>,
        auto_repo: Arc<dyn AutoMessageRepository>,
        notifier: Arc<dyn LiveSessionNotifier>,
    ) -> Self {
        Self {
            conversation_repo,
            auto_repo,
            notifier,
        }
    }
}

#[async_trait]
impl QueuedEventHandler for AutoMessageDispatchHandler {
    async fn handle(&self, event: AutoMessageQueuedEvent) -> anyhow::Result<()> {
        let conversation = self
            .conversation_repo
            .get_or_create(event.sender_id, event.receiver_id)
            .await?;

        let message = self
            .conversation_repo
            .insert_message(
                conversation.id,
                event.sender_id,
                event.content.clone(),
                MessageType::Auto,
            )
            .await?;

        // Best-effort: a missing session or gateway fault never fails the
        // delivery.
        if let Err(err) = self
            .notifier
            .notify(
                event.receiver_id,
                "auto_message",
                json!({
                    "conversationId": conversation.id,
                    "message": message,
                }),
            )
            .await
        {
            tracing::warn!(
                receiver_id = %event.receiver_id,
                error = %err,
                "live session push failed"
            );
        }

        self.auto_repo
            .mark_sent(event.auto_message_id, Utc::now())
            .await?;

        tracing::info!(
            auto_message_id = %event.auto_message_id,
            conversation_id = %conversation.id,
            "automatic message delivered"
        );

        Ok(())
    }
}
