use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, PullConsumer, pull},
};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio_stream::StreamExt;

use crate::infrastructure::broker::transport::{
    BrokerConnection, BrokerTransport, Delivery, DeliveryAck,
};

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub stream: String,
    pub queue_subject: String,
    pub durable: String,
    pub ack_wait_seconds: u64,
}

/// Dials NATS and sets up the durable stream and pull consumer.
///
/// The client library's own reconnection is disabled; the broker client
/// owns the retry policy. `max_deliver = 1` makes a rejected or unacked
/// message final, matching the no-requeue contract.
pub struct NatsTransport {
    config: NatsConfig,
}

impl NatsTransport {
    pub fn new(config: NatsConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

#[async_trait]
impl BrokerTransport for NatsTransport {
    async fn connect(&self) -> anyhow::Result<Arc<dyn BrokerConnection>> {
        let (closed_tx, closed_rx) = watch::channel(false);

        let client = async_nats::ConnectOptions::new()
            .max_reconnects(0)
            .event_callback(move |event| {
                let closed_tx = closed_tx.clone();
                async move {
                    match event {
                        async_nats::Event::Disconnected | async_nats::Event::Closed => {
                            let _ = closed_tx.send(true);
                        }
                        _ => {}
                    }
                }
            })
            .connect(&self.config.url)
            .await?;
        let context = jetstream::new(client.clone());

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: self.config.stream.clone(),
                subjects: vec![self.config.queue_subject.clone()],
                ..Default::default()
            })
            .await?;

        let consumer = stream
            .get_or_create_consumer(
                &self.config.durable,
                pull::Config {
                    durable_name: Some(self.config.durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(self.config.ack_wait_seconds),
                    max_deliver: 1,
                    ..Default::default()
                },
            )
            .await?;

        Ok(Arc::new(NatsConnection {
            client,
            context,
            consumer,
            closed_rx,
        }))
    }
}

struct NatsConnection {
    client: async_nats::Client,
    context: jetstream::Context,
    consumer: PullConsumer,
    closed_rx: watch::Receiver<bool>,
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        persistent: bool,
    ) -> anyhow::Result<()> {
        if persistent {
            // Wait for the stream ack so storage failures surface here.
            let ack = self
                .context
                .publish(subject.to_string(), payload.into())
                .await?;
            ack.await?;
        } else {
            self.client.publish(subject.to_string(), payload.into()).await?;
        }
        Ok(())
    }

    async fn next_delivery(&self) -> anyhow::Result<Option<Delivery>> {
        // Pull one message at a time: at most one unacknowledged delivery
        // in flight per process.
        let mut batch = self
            .consumer
            .batch()
            .max_messages(1)
            .expires(Duration::from_secs(30))
            .messages()
            .await?;

        match batch.next().await {
            Some(Ok(message)) => Ok(Some(Delivery {
                payload: message.payload.to_vec(),
                acker: Box::new(NatsAck { message }),
            })),
            Some(Err(err)) => Err(anyhow::anyhow!("jetstream batch error: {err}")),
            None => Ok(None),
        }
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
        self.client
            .drain()
            .await
            .map_err(|err| anyhow::anyhow!("failed to drain connection: {err}"))
    }
}

struct NatsAck {
    message: jetstream::Message,
}

#[async_trait]
impl DeliveryAck for NatsAck {
    async fn ack(self: Box<Self>) -> anyhow::Result<()> {
        self.message
            .ack()
            .await
            .map_err(|err| anyhow::anyhow!("failed to ack message: {err}"))
    }

    async fn reject(self: Box<Self>) -> anyhow::Result<()> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|err| anyhow::anyhow!("failed to reject message: {err}"))
    }
}
