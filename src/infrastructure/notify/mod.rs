pub mod gateway;

pub use gateway::{HttpGatewayNotifier, NoopNotifier};
