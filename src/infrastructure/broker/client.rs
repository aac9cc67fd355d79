use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    application::{
        handlers::auto_message_dispatcher::QueuedEventHandler,
        services::{event_bus::MessageBus, monitoring::MonitoringSink},
    },
    domain::events::{AutoMessageQueuedEvent, BatchSummaryEvent},
    infrastructure::broker::{
        backoff::Backoff,
        transport::{BrokerConnection, BrokerTransport, Delivery},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct BrokerClientConfig {
    /// Subject the queued-message payloads travel on.
    pub queue_subject: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

struct Inner {
    status: ConnectionStatus,
    conn: Option<Arc<dyn BrokerConnection>>,
}

/// Owns the single logical broker connection.
///
/// Holds its state as instance fields so tests can run any number of
/// independent clients. One registered handler is remembered and re-attached
/// on every transition into Connected; the reconnect loop backs off
/// exponentially and resets on success.
pub struct BrokerClient {
    transport: Arc<dyn BrokerTransport>,
    config: BrokerClientConfig,
    inner: Mutex<Inner>,
    handler: Mutex<Option<Arc<dyn QueuedEventHandler>>>,
    backoff: Mutex<Backoff>,
    /// Delays handed out by the backoff, observable for diagnostics.
    reconnect_delays: Mutex<Vec<Duration>>,
    // Serializes connection attempts between the supervision loop and the
    // publish path.
    connect_lock: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    // Bumped whenever a fresh connection is installed, so the supervision
    // loop re-arms on the current one.
    conn_changed_tx: watch::Sender<u64>,
}

/// Wait between pulls after a transient consumer error.
const PULL_RETRY_DELAY: Duration = Duration::from_millis(500);

impl BrokerClient {
    pub fn new(transport: Arc<dyn BrokerTransport>, config: BrokerClientConfig) -> Arc<Self> {
        let backoff = Backoff::new(config.reconnect_base, config.reconnect_max);
        let (shutdown_tx, _) = watch::channel(false);
        let (conn_changed_tx, _) = watch::channel(0u64);
        Arc::new(Self {
            transport,
            config,
            inner: Mutex::new(Inner {
                status: ConnectionStatus::Disconnected,
                conn: None,
            }),
            handler: Mutex::new(None),
            backoff: Mutex::new(backoff),
            reconnect_delays: Mutex::new(Vec::new()),
            connect_lock: tokio::sync::Mutex::new(()),
            shutdown_tx,
            conn_changed_tx,
        })
    }

    /// Registers the one consume handler. Attached to the durable queue on
    /// every (re)connection; if a connection is already live it is attached
    /// immediately.
    pub fn set_handler(&self, handler: Arc<dyn QueuedEventHandler>) {
        {
            let mut guard = self.handler.lock().expect("handler lock poisoned");
            *guard = Some(handler.clone());
        }
        if let Some(conn) = self.current_conn() {
            tokio::spawn(consume_loop(conn, handler));
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().expect("state lock poisoned").status
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays
            .lock()
            .expect("delay lock poisoned")
            .clone()
    }

    /// Supervision loop: keeps the connection alive until shutdown, waiting
    /// out the backoff between failed attempts. When the publish path swaps
    /// in a replacement connection, the loop re-arms on the replacement.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut conn_changes = self.conn_changed_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                return;
            }
            let conn = match self.current_conn() {
                Some(conn) => conn,
                None => {
                    let Some(conn) = self.connect_with_backoff(&mut shutdown).await else {
                        return;
                    };
                    conn
                }
            };
            let _ = conn_changes.borrow_and_update();
            tokio::select! {
                _ = conn.closed() => {
                    // A connection the publish path already retired is not
                    // ours to tear down again.
                    if self.is_current(&conn) {
                        tracing::warn!("broker connection lost, scheduling reconnect");
                        self.close_current().await;
                    }
                }
                _ = conn_changes.changed() => {}
                _ = shutdown.changed() => {
                    self.close_current().await;
                    return;
                }
            }
        }
    }

    /// Stops the supervision loop (cancelling any pending reconnect wait)
    /// and closes the connection. Close-time errors are logged, not
    /// propagated.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.close_current().await;
    }

    /// Publishes on the queue subject, durably. While disconnected this
    /// triggers a connection attempt; a publish-time failure gets exactly
    /// one reconnect-and-retry before the error surfaces. Unbounded retry
    /// is the caller's re-scan, not ours.
    pub async fn publish_persistent(&self, subject: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.publish_inner(subject, payload, true).await
    }

    /// Fire-and-forget publish for monitoring traffic.
    pub async fn publish_transient(&self, subject: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.publish_inner(subject, payload, false).await
    }

    async fn publish_inner(
        &self,
        subject: &str,
        payload: Vec<u8>,
        persistent: bool,
    ) -> anyhow::Result<()> {
        let conn = match self.current_conn() {
            Some(conn) => conn,
            None => self.connect_once().await?,
        };

        match conn.publish(subject, payload.clone(), persistent).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(error = %first, subject, "publish failed, reconnecting once");
                // Retire the failed connection so its consume loop exits
                // before the replacement's loop starts.
                self.close_current().await;
                let conn = self.connect_once().await?;
                conn.publish(subject, payload, persistent).await
            }
        }
    }

    fn current_conn(&self) -> Option<Arc<dyn BrokerConnection>> {
        let guard = self.inner.lock().expect("state lock poisoned");
        guard.conn.as_ref().filter(|c| !c.is_closed()).cloned()
    }

    fn is_current(&self, conn: &Arc<dyn BrokerConnection>) -> bool {
        let guard = self.inner.lock().expect("state lock poisoned");
        guard.conn.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn))
    }

    fn set_disconnected(&self) {
        let mut guard = self.inner.lock().expect("state lock poisoned");
        guard.status = ConnectionStatus::Disconnected;
    }

    async fn close_current(&self) {
        let conn = {
            let mut guard = self.inner.lock().expect("state lock poisoned");
            guard.status = ConnectionStatus::Disconnected;
            guard.conn.take()
        };
        if let Some(conn) = conn {
            if let Err(err) = conn.close().await {
                tracing::warn!(error = %err, "error while closing broker connection");
            }
        }
    }

    /// One connection attempt, shared by the publish path and the
    /// supervision loop.
    async fn connect_once(&self) -> anyhow::Result<Arc<dyn BrokerConnection>> {
        let _lock = self.connect_lock.lock().await;
        if let Some(conn) = self.current_conn() {
            return Ok(conn);
        }

        {
            let mut guard = self.inner.lock().expect("state lock poisoned");
            guard.status = ConnectionStatus::Connecting;
        }

        match self.transport.connect().await {
            Ok(conn) => {
                {
                    let mut guard = self.inner.lock().expect("state lock poisoned");
                    guard.status = ConnectionStatus::Connected;
                    guard.conn = Some(conn.clone());
                }
                self.backoff.lock().expect("backoff lock poisoned").reset();
                tracing::info!("broker connected");

                let handler = self.handler.lock().expect("handler lock poisoned").clone();
                if let Some(handler) = handler {
                    tokio::spawn(consume_loop(conn.clone(), handler));
                }
                self.conn_changed_tx.send_modify(|n| *n += 1);
                Ok(conn)
            }
            Err(err) => {
                self.set_disconnected();
                Err(err)
            }
        }
    }

    async fn connect_with_backoff(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<dyn BrokerConnection>> {
        loop {
            match self.connect_once().await {
                Ok(conn) => return Some(conn),
                Err(err) => {
                    let delay = {
                        let mut backoff = self.backoff.lock().expect("backoff lock poisoned");
                        backoff.next_delay()
                    };
                    self.reconnect_delays
                        .lock()
                        .expect("delay lock poisoned")
                        .push(delay);
                    tracing::warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "broker connect failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return None,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageBus for BrokerClient {
    async fn publish(&self, event: AutoMessageQueuedEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&event)?;
        self.publish_persistent(&self.config.queue_subject, payload)
            .await
    }
}

#[async_trait]
impl MonitoringSink for BrokerClient {
    async fn publish(&self, topic: &str, event: BatchSummaryEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&event)?;
        self.publish_transient(topic, payload).await
    }
}

/// Serial consume loop for one connection: pull one, handle, acknowledge.
/// Handler failure is a terminal reject; the payload is gone after it.
async fn consume_loop(conn: Arc<dyn BrokerConnection>, handler: Arc<dyn QueuedEventHandler>) {
    loop {
        if conn.is_closed() {
            return;
        }
        let delivery = match conn.next_delivery().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(err) => {
                // A dead connection is caught by the is_closed check above;
                // anything else is worth another pull.
                tracing::warn!(error = %err, "consumer pull failed, retrying");
                tokio::time::sleep(PULL_RETRY_DELAY).await;
                continue;
            }
        };
        process_delivery(delivery, handler.as_ref()).await;
    }
}

async fn process_delivery(delivery: Delivery, handler: &dyn QueuedEventHandler) {
    let Delivery { payload, acker } = delivery;

    let event: AutoMessageQueuedEvent = match serde_json::from_slice(&payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(error = %err, "undecodable payload, dropping message");
            if let Err(err) = acker.reject().await {
                tracing::warn!(error = %err, "failed to reject message");
            }
            return;
        }
    };

    match handler.handle(event.clone()).await {
        Ok(()) => {
            if let Err(err) = acker.ack().await {
                tracing::warn!(error = %err, "failed to ack message");
            }
        }
        Err(err) => {
            // The broker discards rejected messages; this is the pipeline's
            // loss point and the record stays Queued forever.
            tracing::error!(
                auto_message_id = %event.auto_message_id,
                error = %err,
                "handler failed, message dropped without requeue"
            );
            if let Err(err) = acker.reject().await {
                tracing::warn!(error = %err, "failed to reject message");
            }
        }
    }
}
