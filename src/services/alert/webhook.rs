//! Webhook channel: JSON POSTs to a configured endpoint.

use super::AlertChannel;
use crate::config::WebhookChannelConfig;
use crate::models::{DailySummary, Hotspot, RegressionEvent};
use crate::utils::{MonitorError, MonitorResult};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct WebhookChannel {
    config: WebhookChannelConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookChannelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn post(&self, payload: serde_json::Value) -> MonitorResult<()> {
        let response = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::channel_send("webhook", e))?;

        if !response.status().is_success() {
            return Err(MonitorError::channel_send(
                "webhook",
                format!("endpoint returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    async fn send_regression_alerts(&self, events: &[RegressionEvent]) -> MonitorResult<()> {
        self.post(json!({
            "kind": "regression_alerts",
            "events": events,
        }))
        .await
    }

    async fn send_hotspot_summary(&self, hotspots: &[Hotspot]) -> MonitorResult<()> {
        self.post(json!({
            "kind": "hotspot_summary",
            "hotspots": hotspots,
        }))
        .await
    }

    async fn send_daily_summary(&self, summary: &DailySummary) -> MonitorResult<()> {
        self.post(json!({
            "kind": "daily_summary",
            "summary": summary,
        }))
        .await
    }

    async fn test_connection(&self) -> MonitorResult<()> {
        self.post(json!({
            "kind": "connection_test",
            "message": "planwatch channel test",
        }))
        .await
    }
}
