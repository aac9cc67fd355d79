use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload handed to the broker for each queued automatic message.
///
/// Field names are camelCase on the wire; this is the one format the
/// pipeline owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoMessageQueuedEvent {
    pub auto_message_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

/// Summary emitted to the monitoring topic after each generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummaryEvent {
    pub kind: String,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

impl BatchSummaryEvent {
    pub fn auto_message_batch(count: usize, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: "auto_message_batch".to_string(),
            count,
            timestamp,
        }
    }
}
