use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a scheduled automatic message.
///
/// A record is created `Pending`, moved to `Queued` once the broker has
/// accepted it, and to `Sent` once the consumer has materialized it as a
/// conversation message. A sent-but-never-queued state is unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AutoMessageStatus {
    Pending,
    Queued {
        queued_at: DateTime<Utc>,
    },
    Sent {
        queued_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    },
}

impl AutoMessageStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, AutoMessageStatus::Pending)
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, AutoMessageStatus::Queued { .. })
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, AutoMessageStatus::Sent { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    /// Earliest instant at which the record may be handed to the broker.
    pub send_date: DateTime<Utc>,
    pub status: AutoMessageStatus,
    pub created_at: DateTime<Utc>,
}

/// A not-yet-persisted record produced by the batch generator.
#[derive(Debug, Clone)]
pub struct NewAutoMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub send_date: DateTime<Utc>,
}
