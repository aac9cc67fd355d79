use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    application::services::event_bus::MessageBus,
    domain::{events::AutoMessageQueuedEvent, repositories::AutoMessageRepository},
};

/// Ids touched by one scan, bucketed by outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub found: Vec<Uuid>,
    pub queued: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed(ScanReport),
    /// Another scan holds the guard; this trigger was dropped without
    /// touching the datastore.
    AlreadyRunning,
}

/// Bridges "send date has passed" to "handed to the broker".
///
/// Publish failures are retried by omission: the record stays Pending and
/// the next scan picks it up again. Backoff lives in the broker client,
/// not here.
pub struct EnqueueDueMessagesUseCase {
    auto_repo: Arc<dyn AutoMessageRepository>,
    bus: Arc<dyn MessageBus>,
    scanning: AtomicBool,
}

impl EnqueueDueMessagesUseCase {
    pub fn new(auto_repo: Arc<dyn AutoMessageRepository>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            auto_repo,
            bus,
            scanning: AtomicBool::new(false),
        }
    }

    /// Runs one scan, or returns immediately if one is already in
    /// progress. Used by both the timer loop and the manual trigger.
    pub async fn scan(&self) -> anyhow::Result<ScanOutcome> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("scan already in progress, dropping trigger");
            return Ok(ScanOutcome::AlreadyRunning);
        }

        let result = self.scan_inner().await;
        self.scanning.store(false, Ordering::Release);

        if let Ok(report) = &result {
            if !report.found.is_empty() {
                tracing::info!(
                    found = report.found.len(),
                    queued = report.queued.len(),
                    failed = report.failed.len(),
                    "enqueue scan finished"
                );
            }
        }

        result.map(ScanOutcome::Completed)
    }

    async fn scan_inner(&self) -> anyhow::Result<ScanReport> {
        let now = Utc::now();
        let due = self.auto_repo.list_due(now).await?;

        let mut report = ScanReport::default();
        report.found = due.iter().map(|m| m.id).collect();

        for record in due {
            let event = AutoMessageQueuedEvent {
                auto_message_id: record.id,
                sender_id: record.sender_id,
                receiver_id: record.receiver_id,
                content: record.content.clone(),
            };

            // One record's failure must not abort the scan.
            match self.bus.publish(event).await {
                Ok(()) => {
                    self.auto_repo.mark_queued(record.id, Utc::now()).await?;
                    report.queued.push(record.id);
                }
                Err(err) => {
                    tracing::warn!(
                        auto_message_id = %record.id,
                        error = %err,
                        "publish failed, record stays pending"
                    );
                    report.failed.push(record.id);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::watch;

    use super::*;
    use crate::{
        domain::models::NewAutoMessage,
        infrastructure::repositories::in_memory::InMemoryAutoMessageRepository,
    };

    struct FlakyBus {
        fail: AtomicBool,
        published: tokio::sync::Mutex<Vec<AutoMessageQueuedEvent>>,
    }

    impl FlakyBus {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(fail),
                published: tokio::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn publish(&self, event: AutoMessageQueuedEvent) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("broker unavailable");
            }
            self.published.lock().await.push(event);
            Ok(())
        }
    }

    async fn seed_due(repo: &InMemoryAutoMessageRepository) -> Uuid {
        let records = repo
            .insert_batch(vec![NewAutoMessage {
                sender_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                content: "hello".to_string(),
                send_date: Utc::now() - Duration::minutes(1),
            }])
            .await
            .unwrap();
        records[0].id
    }

    #[tokio::test]
    async fn due_record_is_queued_when_publish_succeeds() {
        let repo = Arc::new(InMemoryAutoMessageRepository::new());
        let bus = FlakyBus::new(false);
        let usecase = EnqueueDueMessagesUseCase::new(repo.clone(), bus.clone());
        let id = seed_due(&repo).await;

        let outcome = usecase.scan().await.unwrap();
        let ScanOutcome::Completed(report) = outcome else {
            panic!("expected a completed scan");
        };
        assert_eq!(report.found, vec![id]);
        assert_eq!(report.queued, vec![id]);
        assert!(report.failed.is_empty());

        let record = repo.get(id).await.unwrap().unwrap();
        assert!(record.status.is_queued());
        assert_eq!(bus.published.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_publish_leaves_record_pending_and_next_scan_retries() {
        let repo = Arc::new(InMemoryAutoMessageRepository::new());
        let bus = FlakyBus::new(true);
        let usecase = EnqueueDueMessagesUseCase::new(repo.clone(), bus.clone());
        let id = seed_due(&repo).await;

        let ScanOutcome::Completed(report) = usecase.scan().await.unwrap() else {
            panic!("expected a completed scan");
        };
        assert_eq!(report.failed, vec![id]);
        assert!(repo.get(id).await.unwrap().unwrap().status.is_pending());

        bus.fail.store(false, Ordering::SeqCst);
        let ScanOutcome::Completed(report) = usecase.scan().await.unwrap() else {
            panic!("expected a completed scan");
        };
        assert_eq!(report.queued, vec![id]);
        assert!(repo.get(id).await.unwrap().unwrap().status.is_queued());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_scan() {
        struct FailFirstBus {
            calls: AtomicBool,
        }

        #[async_trait]
        impl MessageBus for FailFirstBus {
            async fn publish(&self, _event: AutoMessageQueuedEvent) -> anyhow::Result<()> {
                if !self.calls.swap(true, Ordering::SeqCst) {
                    anyhow::bail!("first publish fails");
                }
                Ok(())
            }
        }

        let repo = Arc::new(InMemoryAutoMessageRepository::new());
        let first = seed_due(&repo).await;
        let second = seed_due(&repo).await;
        let usecase = EnqueueDueMessagesUseCase::new(
            repo.clone(),
            Arc::new(FailFirstBus {
                calls: AtomicBool::new(false),
            }),
        );

        let ScanOutcome::Completed(report) = usecase.scan().await.unwrap() else {
            panic!("expected a completed scan");
        };
        assert_eq!(report.found.len(), 2);
        assert_eq!(report.queued.len(), 1);
        assert_eq!(report.failed.len(), 1);
        // Which record fails first depends on the due order; between them
        // exactly one is queued.
        let statuses = [
            repo.get(first).await.unwrap().unwrap().status,
            repo.get(second).await.unwrap().unwrap().status,
        ];
        assert_eq!(statuses.iter().filter(|s| s.is_queued()).count(), 1);
        assert_eq!(statuses.iter().filter(|s| s.is_pending()).count(), 1);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_dropped() {
        struct CountingRepo {
            inner: InMemoryAutoMessageRepository,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl AutoMessageRepository for CountingRepo {
            async fn insert_batch(
                &self,
                batch: Vec<NewAutoMessage>,
            ) -> anyhow::Result<Vec<crate::domain::models::AutoMessage>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.insert_batch(batch).await
            }
            async fn list_due(
                &self,
                now: chrono::DateTime<Utc>,
            ) -> anyhow::Result<Vec<crate::domain::models::AutoMessage>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.list_due(now).await
            }
            async fn mark_queued(
                &self,
                id: Uuid,
                queued_at: chrono::DateTime<Utc>,
            ) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.mark_queued(id, queued_at).await
            }
            async fn mark_sent(&self, id: Uuid, sent_at: chrono::DateTime<Utc>) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.mark_sent(id, sent_at).await
            }
            async fn get(
                &self,
                id: Uuid,
            ) -> anyhow::Result<Option<crate::domain::models::AutoMessage>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.get(id).await
            }
        }

        // Blocks inside publish until released, holding the first scan
        // in flight for as long as the test needs.
        struct GatedBus {
            entered: AtomicBool,
            release: watch::Sender<bool>,
        }

        #[async_trait]
        impl MessageBus for GatedBus {
            async fn publish(&self, _event: AutoMessageQueuedEvent) -> anyhow::Result<()> {
                self.entered.store(true, Ordering::SeqCst);
                let mut rx = self.release.subscribe();
                while !*rx.borrow() {
                    rx.changed().await?;
                }
                Ok(())
            }
        }

        let repo = Arc::new(CountingRepo {
            inner: InMemoryAutoMessageRepository::new(),
            calls: AtomicUsize::new(0),
        });
        let id = seed_due(&repo.inner).await;
        let (release_tx, _) = watch::channel(false);
        let bus = Arc::new(GatedBus {
            entered: AtomicBool::new(false),
            release: release_tx,
        });
        let usecase = Arc::new(EnqueueDueMessagesUseCase::new(repo.clone(), bus.clone()));

        let first = tokio::spawn({
            let usecase = usecase.clone();
            async move { usecase.scan().await }
        });
        while !bus.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        // The first scan is mid-publish; a trigger arriving now is dropped
        // without a single datastore call.
        let calls_before = repo.calls.load(Ordering::SeqCst);
        let outcome = usecase.scan().await.unwrap();
        assert_eq!(outcome, ScanOutcome::AlreadyRunning);
        assert_eq!(repo.calls.load(Ordering::SeqCst), calls_before);

        // Releasing the gate lets the in-flight scan finish normally.
        let _ = bus.release.send(true);
        let ScanOutcome::Completed(report) = first.await.unwrap().unwrap() else {
            panic!("expected a completed scan");
        };
        assert_eq!(report.queued, vec![id]);
        assert!(repo.inner.get(id).await.unwrap().unwrap().status.is_queued());
    }

    #[tokio::test]
    async fn guard_clears_after_a_failed_scan() {
        struct BrokenRepo;

        #[async_trait]
        impl AutoMessageRepository for BrokenRepo {
            async fn insert_batch(
                &self,
                _batch: Vec<NewAutoMessage>,
            ) -> anyhow::Result<Vec<crate::domain::models::AutoMessage>> {
                anyhow::bail!("datastore down")
            }
            async fn list_due(
                &self,
                _now: chrono::DateTime<Utc>,
            ) -> anyhow::Result<Vec<crate::domain::models::AutoMessage>> {
                anyhow::bail!("datastore down")
            }
            async fn mark_queued(
                &self,
                _id: Uuid,
                _queued_at: chrono::DateTime<Utc>,
            ) -> anyhow::Result<()> {
                anyhow::bail!("datastore down")
            }
            async fn mark_sent(
                &self,
                _id: Uuid,
                _sent_at: chrono::DateTime<Utc>,
            ) -> anyhow::Result<()> {
                anyhow::bail!("datastore down")
            }
            async fn get(
                &self,
                _id: Uuid,
            ) -> anyhow::Result<Option<crate::domain::models::AutoMessage>> {
                anyhow::bail!("datastore down")
            }
        }

        let usecase = EnqueueDueMessagesUseCase::new(Arc::new(BrokenRepo), FlakyBus::new(false));

        assert!(usecase.scan().await.is_err());
        assert!(!usecase.scanning.load(Ordering::SeqCst));
    }
}
