pub mod backoff;
pub mod client;
pub mod memory;
pub mod nats;
pub mod transport;

pub use client::{BrokerClient, BrokerClientConfig, ConnectionStatus};
pub use nats::{NatsConfig, NatsTransport};
