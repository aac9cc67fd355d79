use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};
use uuid::Uuid;

use crate::domain::{
    errors::DomainError,
    models::{
        AutoMessage, AutoMessageStatus, ChatMessage, Conversation, MessageType, NewAutoMessage,
        User,
    },
    repositories::{AutoMessageRepository, ConversationRepository, UserRepository},
};

pub type PgPool = Pool<Postgres>;

#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn list_active(&self) -> anyhow::Result<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, display_name, is_active, created_at, updated_at
            FROM users
            WHERE is_active = TRUE
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(User::from).collect())
    }

    async fn get(&self, id: &Uuid) -> anyhow::Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, display_name, is_active, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(User::from))
    }

    async fn upsert(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, display_name, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresAutoMessageRepository {
    pool: PgPool,
}

impl PostgresAutoMessageRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl AutoMessageRepository for PostgresAutoMessageRepository {
    async fn insert_batch(&self, batch: Vec<NewAutoMessage>) -> anyhow::Result<Vec<AutoMessage>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(batch.len());
        for new in batch {
            let record = sqlx::query_as::<_, AutoMessageRecord>(
                r#"
                INSERT INTO auto_messages
                    (id, sender_id, receiver_id, content, send_date, status, created_at)
                VALUES ($1, $2, $3, $4, $5, 'pending', $6)
                RETURNING id, sender_id, receiver_id, content, send_date,
                          status, queued_at, sent_at, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(new.sender_id)
            .bind(new.receiver_id)
            .bind(&new.content)
            .bind(new.send_date)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(AutoMessage::try_from(record)?);
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<AutoMessage>> {
        let records = sqlx::query_as::<_, AutoMessageRecord>(
            r#"
            SELECT id, sender_id, receiver_id, content, send_date,
                   status, queued_at, sent_at, created_at
            FROM auto_messages
            WHERE status = 'pending' AND send_date <= $1
            ORDER BY send_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        records
            .into_iter()
            .map(AutoMessage::try_from)
            .collect::<Result<Vec<_>, _>>()
    }

    async fn mark_queued(&self, id: Uuid, queued_at: DateTime<Utc>) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE auto_messages
            SET status = 'queued', queued_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(queued_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            return Err(DomainError::InvalidState(format!("auto message {id} is not pending")).into());
        }
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE auto_messages
            SET status = 'sent', sent_at = $2
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            return Err(DomainError::InvalidState(format!("auto message {id} is not queued")).into());
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AutoMessage>> {
        let record = sqlx::query_as::<_, AutoMessageRecord>(
            r#"
            SELECT id, sender_id, receiver_id, content, send_date,
                   status, queued_at, sent_at, created_at
            FROM auto_messages
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(AutoMessage::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PostgresConversationRepository {
    pool: PgPool,
}

impl PostgresConversationRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl ConversationRepository for PostgresConversationRepository {
    async fn get_or_create(&self, a: Uuid, b: Uuid) -> anyhow::Result<Conversation> {
        let (first, second) = Conversation::normalize_pair(a, b);
        let now = Utc::now();

        // The unique constraint on the normalized pair makes the second
        // concurrent insert a no-op; the select below sees the winner.
        sqlx::query(
            r#"
            INSERT INTO conversations (id, participant_a, participant_b, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (participant_a, participant_b) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(first)
        .bind(second)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, participant_a, participant_b, last_message_id, created_at, updated_at
            FROM conversations
            WHERE participant_a = $1 AND participant_b = $2
            "#,
        )
        .bind(first)
        .bind(second)
        .fetch_one(&self.pool)
        .await?;
        Ok(Conversation::from(record))
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: String,
        message_type: MessageType,
    ) -> anyhow::Result<ChatMessage> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, ChatMessageRecord>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, body, message_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, conversation_id, sender_id, body, message_type, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(sender_id)
        .bind(&body)
        .bind(message_type_str(message_type))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(record.id)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        ChatMessage::try_from(record)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, participant_a, participant_b, last_message_id, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Conversation::from))
    }

    async fn list_messages(&self, conversation_id: Uuid) -> anyhow::Result<Vec<ChatMessage>> {
        let records = sqlx::query_as::<_, ChatMessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, body, message_type, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        records
            .into_iter()
            .map(ChatMessage::try_from)
            .collect::<Result<Vec<_>, _>>()
    }
}

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    display_name: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        User {
            id: record.id,
            username: record.username,
            display_name: record.display_name,
            is_active: record.is_active,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AutoMessageRecord {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: String,
    send_date: DateTime<Utc>,
    status: String,
    queued_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AutoMessageRecord> for AutoMessage {
    type Error = anyhow::Error;

    fn try_from(record: AutoMessageRecord) -> Result<Self, Self::Error> {
        let status = match (record.status.as_str(), record.queued_at, record.sent_at) {
            ("pending", None, None) => AutoMessageStatus::Pending,
            ("queued", Some(queued_at), None) => AutoMessageStatus::Queued { queued_at },
            ("sent", Some(queued_at), Some(sent_at)) => {
                AutoMessageStatus::Sent { queued_at, sent_at }
            }
            (status, _, _) => anyhow::bail!(
                "auto message {} has inconsistent status columns (status = {status})",
                record.id
            ),
        };
        Ok(AutoMessage {
            id: record.id,
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            content: record.content,
            send_date: record.send_date,
            status,
            created_at: record.created_at,
        })
    }
}

#[derive(FromRow)]
struct ConversationRecord {
    id: Uuid,
    participant_a: Uuid,
    participant_b: Uuid,
    last_message_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        Conversation {
            id: record.id,
            participant_a: record.participant_a,
            participant_b: record.participant_b,
            last_message_id: record.last_message_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ChatMessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    body: String,
    message_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChatMessageRecord> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(record: ChatMessageRecord) -> Result<Self, Self::Error> {
        let message_type = match record.message_type.as_str() {
            "user" => MessageType::User,
            "auto" => MessageType::Auto,
            other => anyhow::bail!("unknown message type {other:?}"),
        };
        Ok(ChatMessage {
            id: record.id,
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            body: record.body,
            message_type,
            created_at: record.created_at,
        })
    }
}

fn message_type_str(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::User => "user",
        MessageType::Auto => "auto",
    }
}
