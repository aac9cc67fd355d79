use async_trait::async_trait;

use crate::domain::events::AutoMessageQueuedEvent;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, event: AutoMessageQueuedEvent) -> anyhow::Result<()>;
}
