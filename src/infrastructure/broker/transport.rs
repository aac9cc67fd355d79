use std::sync::Arc;

use async_trait::async_trait;

/// A way to open connections to the broker. The client owns exactly one
/// live connection at a time; the transport just dials.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    async fn connect(&self) -> anyhow::Result<Arc<dyn BrokerConnection>>;
}

/// One live broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Publishes a payload. `persistent` messages must be stored durably
    /// before the call returns.
    async fn publish(&self, subject: &str, payload: Vec<u8>, persistent: bool)
    -> anyhow::Result<()>;

    /// Pulls at most one message off the durable queue. `Ok(None)` means
    /// nothing is available right now; callers loop. The pull never holds
    /// more than one unacknowledged delivery in flight.
    async fn next_delivery(&self) -> anyhow::Result<Option<Delivery>>;

    fn is_closed(&self) -> bool;

    /// Resolves once the connection is lost.
    async fn closed(&self);

    async fn close(&self) -> anyhow::Result<()>;
}

pub struct Delivery {
    pub payload: Vec<u8>,
    pub acker: Box<dyn DeliveryAck>,
}

#[async_trait]
pub trait DeliveryAck: Send {
    async fn ack(self: Box<Self>) -> anyhow::Result<()>;

    /// Terminal rejection: the broker discards the message. No requeue, no
    /// dead letter.
    async fn reject(self: Box<Self>) -> anyhow::Result<()>;
}
