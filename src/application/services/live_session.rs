use async_trait::async_trait;
use uuid::Uuid;

/// Push to a user's live realtime session, if one exists.
///
/// Fire-and-forget: callers treat a returned error as a logging concern,
/// never as a processing failure. A user without an active session is a
/// successful no-op.
#[async_trait]
pub trait LiveSessionNotifier: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}
