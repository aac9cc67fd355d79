//! End-to-end pipeline scenarios on in-memory infrastructure: generation,
//! enqueueing, broker delivery, and the documented failure paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use automessaging::{
    application::{
        handlers::auto_message_dispatcher::AutoMessageDispatchHandler,
        services::{
            live_session::LiveSessionNotifier, monitoring::MonitoringSink,
        },
        usecases::{
            enqueue_due_messages::{EnqueueDueMessagesUseCase, ScanOutcome},
            generate_auto_messages::{GenerateAutoMessagesConfig, GenerateAutoMessagesUseCase},
        },
    },
    domain::{
        events::BatchSummaryEvent,
        models::{AutoMessage, MessageType, User},
        repositories::{AutoMessageRepository, ConversationRepository, UserRepository},
    },
    infrastructure::{
        broker::{memory::InMemoryBroker, BrokerClient, BrokerClientConfig},
        repositories::in_memory::{
            InMemoryAutoMessageRepository, InMemoryConversationRepository, InMemoryUserRepository,
        },
    },
};

#[derive(Default)]
struct RecordingNotifier {
    pushes: Mutex<Vec<(Uuid, String, serde_json::Value)>>,
}

#[async_trait]
impl LiveSessionNotifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.pushes
            .lock()
            .await
            .push((user_id, event.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingMonitoring {
    summaries: Mutex<Vec<(String, BatchSummaryEvent)>>,
}

#[async_trait]
impl MonitoringSink for RecordingMonitoring {
    async fn publish(&self, topic: &str, event: BatchSummaryEvent) -> anyhow::Result<()> {
        self.summaries.lock().await.push((topic.to_string(), event));
        Ok(())
    }
}

/// Wrapper that fails conversation creation on demand, for the loss-path
/// scenario.
struct FaultyConversationRepo {
    inner: InMemoryConversationRepository,
    fail: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl ConversationRepository for FaultyConversationRepo {
    async fn get_or_create(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> anyhow::Result<automessaging::domain::models::Conversation> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("conversation store unavailable");
        }
        self.inner.get_or_create(a, b).await
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: String,
        message_type: MessageType,
    ) -> anyhow::Result<automessaging::domain::models::ChatMessage> {
        self.inner
            .insert_message(conversation_id, sender_id, body, message_type)
            .await
    }

    async fn get(
        &self,
        id: Uuid,
    ) -> anyhow::Result<Option<automessaging::domain::models::Conversation>> {
        self.inner.get(id).await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> anyhow::Result<Vec<automessaging::domain::models::ChatMessage>> {
        self.inner.list_messages(conversation_id).await
    }
}

struct Harness {
    users: Arc<InMemoryUserRepository>,
    auto: Arc<InMemoryAutoMessageRepository>,
    conversations: Arc<FaultyConversationRepo>,
    broker: Arc<InMemoryBroker>,
    client: Arc<BrokerClient>,
    generator: GenerateAutoMessagesUseCase,
    enqueuer: EnqueueDueMessagesUseCase,
    notifier: Arc<RecordingNotifier>,
    monitoring: Arc<RecordingMonitoring>,
    runner: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn new() -> Self {
        let users = Arc::new(InMemoryUserRepository::new());
        let auto = Arc::new(InMemoryAutoMessageRepository::new());
        let conversations = Arc::new(FaultyConversationRepo {
            inner: InMemoryConversationRepository::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let monitoring = Arc::new(RecordingMonitoring::default());

        let broker = InMemoryBroker::new();
        let client = BrokerClient::new(
            broker.clone(),
            BrokerClientConfig {
                queue_subject: "automessages.queued".to_string(),
                reconnect_base: Duration::from_millis(20),
                reconnect_max: Duration::from_millis(80),
            },
        );
        client.set_handler(Arc::new(AutoMessageDispatchHandler::new(
            conversations.clone(),
            auto.clone(),
            notifier.clone(),
        )));
        let runner = tokio::spawn(client.clone().run());

        let generator = GenerateAutoMessagesUseCase::new(
            users.clone(),
            auto.clone(),
            monitoring.clone(),
            GenerateAutoMessagesConfig {
                monitoring_topic: "monitoring.automessages".to_string(),
            },
        );
        let enqueuer = EnqueueDueMessagesUseCase::new(auto.clone(), client.clone());

        Self {
            users,
            auto,
            conversations,
            broker,
            client,
            generator,
            enqueuer,
            notifier,
            monitoring,
            runner,
        }
    }

    async fn add_user(&self, name: &str) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: name.to_string(),
            display_name: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.users.upsert(&user).await.unwrap();
        user
    }

    async fn only_record(&self) -> AutoMessage {
        let summary = self.generator.execute().await.unwrap();
        assert_eq!(summary.count, 1);
        let due = self
            .auto
            .list_due(Utc::now() + chrono::Duration::days(2))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        due.into_iter().next().unwrap()
    }

    async fn wait_until<F, Fut>(&self, mut probe: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..500 {
            if probe().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn shutdown(self) {
        self.client.shutdown().await;
        let _ = self.runner.await;
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_a_generation_produces_one_pending_record() {
    let harness = Harness::new();
    let alice = harness.add_user("alice").await;
    let bob = harness.add_user("bob").await;

    let before = Utc::now();
    let record = harness.only_record().await;

    let pair = [record.sender_id, record.receiver_id];
    assert!(pair.contains(&alice.id));
    assert!(pair.contains(&bob.id));
    assert!(record.status.is_pending());
    assert!(!record.content.is_empty());
    assert!(record.send_date >= before + chrono::Duration::hours(1));
    assert!(record.send_date < Utc::now() + chrono::Duration::hours(24));

    let summaries = harness.monitoring.summaries.lock().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].0, "monitoring.automessages");
    assert_eq!(summaries[0].1.count, 1);
    drop(summaries);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_b_due_record_flows_to_a_delivered_conversation() {
    let harness = Harness::new();
    harness.add_user("alice").await;
    harness.add_user("bob").await;

    let record = harness.only_record().await;
    harness
        .auto
        .set_send_date(record.id, Utc::now() - chrono::Duration::minutes(1))
        .await;

    let ScanOutcome::Completed(report) = harness.enqueuer.scan().await.unwrap() else {
        panic!("expected a completed scan");
    };
    assert_eq!(report.queued, vec![record.id]);
    assert!(harness
        .auto
        .get(record.id)
        .await
        .unwrap()
        .unwrap()
        .status
        .is_queued());

    harness
        .wait_until(|| async {
            harness
                .auto
                .get(record.id)
                .await
                .unwrap()
                .unwrap()
                .status
                .is_sent()
        })
        .await;

    let conversation = harness
        .conversations
        .get_or_create(record.sender_id, record.receiver_id)
        .await
        .unwrap();
    let messages = harness
        .conversations
        .list_messages(conversation.id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, record.content);
    assert_eq!(messages[0].message_type, MessageType::Auto);
    assert_eq!(conversation.last_message_id, Some(messages[0].id));

    let pushes = harness.notifier.pushes.lock().await;
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, record.receiver_id);
    assert_eq!(pushes[0].1, "auto_message");
    drop(pushes);

    assert_eq!(harness.broker.acked_count(), 1);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_c_broker_outage_converges_after_reconnect() {
    let harness = Harness::new();
    harness.add_user("alice").await;
    harness.add_user("bob").await;

    let record = harness.only_record().await;
    harness
        .auto
        .set_send_date(record.id, Utc::now() - chrono::Duration::minutes(1))
        .await;

    // Wait for the first connection, then take the broker down hard.
    harness
        .wait_until(|| async { harness.broker.connect_count() >= 1 })
        .await;
    harness.broker.fail_connects(true);
    harness.broker.drop_connection();

    let ScanOutcome::Completed(report) = harness.enqueuer.scan().await.unwrap() else {
        panic!("expected a completed scan");
    };
    assert_eq!(report.failed, vec![record.id]);
    assert!(harness
        .auto
        .get(record.id)
        .await
        .unwrap()
        .unwrap()
        .status
        .is_pending());

    // Broker comes back; the supervision loop reconnects within the
    // backoff window and re-attaches the consumer.
    harness.broker.fail_connects(false);
    harness
        .wait_until(|| async { harness.broker.connect_count() >= 2 })
        .await;
    assert!(!harness.client.reconnect_delays().is_empty());

    // The next interval's scan converges to scenario B's end state.
    let ScanOutcome::Completed(report) = harness.enqueuer.scan().await.unwrap() else {
        panic!("expected a completed scan");
    };
    assert_eq!(report.queued, vec![record.id]);
    harness
        .wait_until(|| async {
            harness
                .auto
                .get(record.id)
                .await
                .unwrap()
                .unwrap()
                .status
                .is_sent()
        })
        .await;

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_d_handler_failure_drops_the_message_for_good() {
    let harness = Harness::new();
    harness.add_user("alice").await;
    harness.add_user("bob").await;

    let record = harness.only_record().await;
    harness
        .auto
        .set_send_date(record.id, Utc::now() - chrono::Duration::minutes(1))
        .await;
    harness
        .conversations
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let ScanOutcome::Completed(report) = harness.enqueuer.scan().await.unwrap() else {
        panic!("expected a completed scan");
    };
    assert_eq!(report.queued, vec![record.id]);

    // The consumer fails, the broker discards the message, and nothing
    // ever retries it: the record stays Queued forever.
    harness
        .wait_until(|| async { harness.broker.rejected_count() >= 1 })
        .await;

    let status = harness.auto.get(record.id).await.unwrap().unwrap().status;
    assert!(status.is_queued());
    assert!(!status.is_sent());
    assert_eq!(harness.broker.queue_len(), 0);
    assert_eq!(harness.conversations.inner.count().await, 0);

    harness.shutdown().await;
}
