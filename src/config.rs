use std::env::var;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;

pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub stream: String,
    pub queue_subject: String,
    pub durable: String,
    pub ack_wait_seconds: u64,
    pub monitoring_subject: String,
    pub scan_interval: Duration,
    /// UTC hour of the daily generation run.
    pub batch_hour_utc: u32,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub gateway_notify_url: Option<String>,
}

impl Config {
    pub fn try_parse() -> anyhow::Result<Config> {
        let _ = dotenv();

        Ok(Config {
            database_url: var("DATABASE_URL").context("DATABASE_URL env param is required")?,
            nats_url: var("NATS_URL").context("NATS_URL env param is required")?,
            stream: var_or("BROKER_STREAM", "AUTOMESSAGES".to_string())?,
            queue_subject: var_or("QUEUE_SUBJECT", "automessages.queued".to_string())?,
            durable: var_or("CONSUMER_DURABLE", "automessage-consumer".to_string())?,
            ack_wait_seconds: var_or("ACK_WAIT_SECONDS", 30u64)?,
            monitoring_subject: var_or("MONITORING_SUBJECT", "monitoring.automessages".to_string())?,
            scan_interval: Duration::from_secs(var_or("SCAN_INTERVAL_SECS", 60u64)?),
            batch_hour_utc: var_or("BATCH_HOUR_UTC", 2u32)?,
            reconnect_base: Duration::from_millis(var_or("RECONNECT_BASE_MS", 500u64)?),
            reconnect_max: Duration::from_millis(var_or("RECONNECT_MAX_MS", 30_000u64)?),
            gateway_notify_url: var("GATEWAY_NOTIFY_URL").ok(),
        })
    }
}

fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {name} env param")),
        Err(_) => Ok(default),
    }
}
