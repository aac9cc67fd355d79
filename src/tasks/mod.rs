use std::sync::Arc;

use tokio::sync::watch;

use crate::application::{
    services::schedule::Schedule,
    usecases::{
        enqueue_due_messages::EnqueueDueMessagesUseCase,
        generate_auto_messages::GenerateAutoMessagesUseCase,
    },
};

/// Daily batch generation loop. A failed run is logged and the loop waits
/// for the next firing; there is no partial-batch recovery.
pub async fn run_generation_loop(
    schedule: Arc<dyn Schedule>,
    usecase: Arc<GenerateAutoMessagesUseCase>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = schedule.wait() => {
                if let Err(err) = usecase.execute().await {
                    tracing::error!(error = %err, "batch generation run failed");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("generation loop stopping");
                return;
            }
        }
    }
}

/// Due-message scan loop. An overlapping firing is dropped by the scan's
/// own guard; a failed scan is logged and retried on the next firing.
pub async fn run_enqueue_loop(
    schedule: Arc<dyn Schedule>,
    usecase: Arc<EnqueueDueMessagesUseCase>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = schedule.wait() => {
                if let Err(err) = usecase.scan().await {
                    tracing::error!(error = %err, "enqueue scan failed");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("enqueue loop stopping");
                return;
            }
        }
    }
}
