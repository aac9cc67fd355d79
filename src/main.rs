use std::sync::Arc;

use chrono::NaiveTime;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use automessaging::{
    application::{
        handlers::auto_message_dispatcher::AutoMessageDispatchHandler,
        services::{
            live_session::LiveSessionNotifier,
            schedule::{DailyAt, FixedInterval, Schedule},
        },
        usecases::{
            enqueue_due_messages::EnqueueDueMessagesUseCase,
            generate_auto_messages::{GenerateAutoMessagesConfig, GenerateAutoMessagesUseCase},
        },
    },
    config::Config,
    infrastructure::{
        broker::{BrokerClient, BrokerClientConfig, NatsConfig, NatsTransport},
        notify::{HttpGatewayNotifier, NoopNotifier},
        repositories::postgres::{
            PostgresAutoMessageRepository, PostgresConversationRepository, PostgresUserRepository,
        },
    },
    tasks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::try_parse()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let user_repo = PostgresUserRepository::new(pool.clone());
    let auto_repo = PostgresAutoMessageRepository::new(pool.clone());
    let conversation_repo = PostgresConversationRepository::new(pool);

    let transport = NatsTransport::new(NatsConfig {
        url: config.nats_url.clone(),
        stream: config.stream.clone(),
        queue_subject: config.queue_subject.clone(),
        durable: config.durable.clone(),
        ack_wait_seconds: config.ack_wait_seconds,
    });
    let broker = BrokerClient::new(
        transport,
        BrokerClientConfig {
            queue_subject: config.queue_subject.clone(),
            reconnect_base: config.reconnect_base,
            reconnect_max: config.reconnect_max,
        },
    );

    let notifier: Arc<dyn LiveSessionNotifier> = match &config.gateway_notify_url {
        Some(url) => HttpGatewayNotifier::new(url.clone())?,
        None => Arc::new(NoopNotifier),
    };

    let handler = Arc::new(AutoMessageDispatchHandler::new(
        conversation_repo,
        auto_repo.clone(),
        notifier,
    ));
    broker.set_handler(handler);

    let generator = Arc::new(GenerateAutoMessagesUseCase::new(
        user_repo,
        auto_repo.clone(),
        broker.clone(),
        GenerateAutoMessagesConfig {
            monitoring_topic: config.monitoring_subject.clone(),
        },
    ));
    let enqueuer = Arc::new(EnqueueDueMessagesUseCase::new(auto_repo, broker.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let batch_time = NaiveTime::from_hms_opt(config.batch_hour_utc, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("BATCH_HOUR_UTC out of range"))?;
    let daily: Arc<dyn Schedule> = Arc::new(DailyAt::new(batch_time));
    let interval: Arc<dyn Schedule> = Arc::new(FixedInterval::new(config.scan_interval));

    let broker_task = tokio::spawn(broker.clone().run());
    let generation_task = tokio::spawn(tasks::run_generation_loop(
        daily,
        generator,
        shutdown_rx.clone(),
    ));
    let enqueue_task = tokio::spawn(tasks::run_enqueue_loop(interval, enqueuer, shutdown_rx));

    tracing::info!("automessaging pipeline started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    broker.shutdown().await;
    let _ = tokio::join!(broker_task, generation_task, enqueue_task);

    Ok(())
}
