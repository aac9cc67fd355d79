use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::application::services::live_session::LiveSessionNotifier;

/// Pushes events to the realtime gateway's internal notify endpoint. The
/// gateway drops events for users without a live session, so a 2xx is all
/// this client looks for.
pub struct HttpGatewayNotifier {
    http: Client,
    base_url: String,
}

impl HttpGatewayNotifier {
    pub fn new(base_url: String) -> anyhow::Result<Arc<dyn LiveSessionNotifier>> {
        let http = Client::builder()
            .user_agent("automessaging/gateway-notifier")
            .build()?;
        Ok(Arc::new(Self { http, base_url }))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotifyRequest<'a> {
    user_id: Uuid,
    event: &'a str,
    payload: serde_json::Value,
}

#[async_trait]
impl LiveSessionNotifier for HttpGatewayNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/internal/notify", self.base_url))
            .json(&NotifyRequest {
                user_id,
                event,
                payload,
            })
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}

/// For deployments without a realtime gateway.
pub struct NoopNotifier;

#[async_trait]
impl LiveSessionNotifier for NoopNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        _payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        tracing::debug!(%user_id, event, "no gateway configured, dropping push");
        Ok(())
    }
}
