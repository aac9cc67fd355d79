use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::infrastructure::broker::transport::{
    BrokerConnection, BrokerTransport, Delivery, DeliveryAck,
};

/// In-process stand-in for the durable broker, with switchable fault
/// injection. Queue contents survive connection drops the way a durable
/// stream would.
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    fail_connects: AtomicBool,
    fail_publishes: AtomicBool,
    queue: Mutex<VecDeque<Vec<u8>>>,
    connects: AtomicUsize,
    acked: AtomicUsize,
    rejected: AtomicUsize,
    latest_conn: Mutex<Option<watch::Sender<bool>>>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                fail_connects: AtomicBool::new(false),
                fail_publishes: AtomicBool::new(false),
                queue: Mutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
                acked: AtomicUsize::new(0),
                rejected: AtomicUsize::new(0),
                latest_conn: Mutex::new(None),
            }),
        })
    }

    pub fn fail_connects(&self, on: bool) {
        self.shared.fail_connects.store(on, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, on: bool) {
        self.shared.fail_publishes.store(on, Ordering::SeqCst);
    }

    /// Forcibly closes the most recent connection, as a broker restart or
    /// network fault would.
    pub fn drop_connection(&self) {
        if let Some(tx) = self
            .shared
            .latest_conn
            .lock()
            .expect("connection lock poisoned")
            .take()
        {
            let _ = tx.send(true);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().expect("queue lock poisoned").len()
    }

    pub fn acked_count(&self) -> usize {
        self.shared.acked.load(Ordering::SeqCst)
    }

    pub fn rejected_count(&self) -> usize {
        self.shared.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn connect(&self) -> anyhow::Result<Arc<dyn BrokerConnection>> {
        if self.shared.fail_connects.load(Ordering::SeqCst) {
            anyhow::bail!("broker unreachable");
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        let (closed_tx, closed_rx) = watch::channel(false);
        *self
            .shared
            .latest_conn
            .lock()
            .expect("connection lock poisoned") = Some(closed_tx.clone());

        Ok(Arc::new(InMemoryConnection {
            shared: self.shared.clone(),
            closed_tx,
            closed_rx,
        }))
    }
}

struct InMemoryConnection {
    shared: Arc<Shared>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn publish(
        &self,
        _subject: &str,
        payload: Vec<u8>,
        persistent: bool,
    ) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("connection closed");
        }
        if self.shared.fail_publishes.load(Ordering::SeqCst) {
            anyhow::bail!("publish refused");
        }
        if persistent {
            self.shared
                .queue
                .lock()
                .expect("queue lock poisoned")
                .push_back(payload);
        }
        Ok(())
    }

    async fn next_delivery(&self) -> anyhow::Result<Option<Delivery>> {
        // Short poll so the consume loop observes closure promptly.
        tokio::time::sleep(Duration::from_millis(2)).await;
        if self.is_closed() {
            return Ok(None);
        }
        let payload = self
            .shared
            .queue
            .lock()
            .expect("queue lock poisoned")
            .pop_front();
        Ok(payload.map(|payload| Delivery {
            payload,
            acker: Box::new(InMemoryAck {
                shared: self.shared.clone(),
            }),
        }))
    }

    fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        let _ = self.closed_tx.send(true);
        Ok(())
    }
}

struct InMemoryAck {
    shared: Arc<Shared>,
}

#[async_trait]
impl DeliveryAck for InMemoryAck {
    async fn ack(self: Box<Self>) -> anyhow::Result<()> {
        self.shared.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(self: Box<Self>) -> anyhow::Result<()> {
        // Discarded, never requeued.
        self.shared.rejected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
