use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};

use crate::{
    application::services::monitoring::MonitoringSink,
    domain::{
        events::BatchSummaryEvent,
        models::{NewAutoMessage, User},
        repositories::{AutoMessageRepository, UserRepository},
    },
};

/// Phrases an automatic message is drawn from.
const PHRASES: &[&str] = &[
    "Hey, how have you been?",
    "Hope you're having a great day!",
    "Long time no talk, what's new?",
    "Hello there! How's everything going?",
    "Just checking in, how are things?",
    "Got any plans for the weekend?",
];

/// Send-time offset window, in seconds: uniform over [1h, 24h).
const MIN_DELAY_SECS: i64 = 3_600;
const MAX_DELAY_SECS: i64 = 86_400;

pub struct GenerateAutoMessagesConfig {
    pub monitoring_topic: String,
}

/// Daily batch generator: pairs up the active user population and schedules
/// one automatic message per pair.
pub struct GenerateAutoMessagesUseCase {
    user_repo: Arc<dyn UserRepository>,
    auto_repo: Arc<dyn AutoMessageRepository>,
    monitoring: Arc<dyn MonitoringSink>,
    config: GenerateAutoMessagesConfig,
}

impl GenerateAutoMessagesUseCase {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        auto_repo: Arc<dyn AutoMessageRepository>,
        monitoring: Arc<dyn MonitoringSink>,
        config: GenerateAutoMessagesConfig,
    ) -> Self {
        Self {
            user_repo,
            auto_repo,
            monitoring,
            config,
        }
    }

    /// Runs one generation pass. A bulk-insert failure abandons the whole
    /// run; the next scheduled pass starts from scratch.
    pub async fn execute(&self) -> anyhow::Result<BatchSummaryEvent> {
        let users = self.user_repo.list_active().await?;
        let now = Utc::now();

        if users.is_empty() {
            tracing::info!("no active users, skipping batch generation");
            return Ok(BatchSummaryEvent::auto_message_batch(0, now));
        }

        let batch = Self::build_batch(users);
        let count = batch.len();

        if count > 0 {
            self.auto_repo.insert_batch(batch).await?;
        }

        let summary = BatchSummaryEvent::auto_message_batch(count, now);
        tracing::info!(count, "generated automatic message batch");

        if let Err(err) = self
            .monitoring
            .publish(&self.config.monitoring_topic, summary.clone())
            .await
        {
            tracing::warn!(error = %err, "failed to publish batch summary");
        }

        Ok(summary)
    }

    /// Shuffles the users and walks consecutive pairs. With an odd
    /// population the last shuffled user stays unpaired for this run.
    fn build_batch(mut users: Vec<User>) -> Vec<NewAutoMessage> {
        let mut rng = rand::rng();
        users.shuffle(&mut rng);

        let now = Utc::now();
        let mut batch = Vec::with_capacity(users.len() / 2);
        let mut i = 0;
        while i + 1 < users.len() {
            let content = PHRASES
                .choose(&mut rng)
                .copied()
                .unwrap_or(PHRASES[0])
                .to_string();
            let delay_secs = rng.random_range(MIN_DELAY_SECS..MAX_DELAY_SECS);
            batch.push(NewAutoMessage {
                sender_id: users[i].id,
                receiver_id: users[i + 1].id,
                content,
                send_date: now + Duration::seconds(delay_secs),
            });
            i += 2;
        }
        batch
    }
}
