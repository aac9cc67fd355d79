use async_trait::async_trait;

use crate::domain::events::BatchSummaryEvent;

/// Best-effort sink for operational summary events.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    async fn publish(&self, topic: &str, event: BatchSummaryEvent) -> anyhow::Result<()>;
}
