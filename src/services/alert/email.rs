//! Email channel: plain-text notifications over SMTP.

use super::AlertChannel;
use crate::config::EmailChannelConfig;
use crate::models::{DailySummary, Hotspot, RegressionEvent};
use crate::utils::{MonitorError, MonitorResult};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct EmailChannel {
    config: EmailChannelConfig,
}

impl EmailChannel {
    pub fn new(config: EmailChannelConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> MonitorResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| MonitorError::channel_send("email", e))?
                .port(self.config.smtp_port);

        if !self.config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.smtp_username.clone(),
                self.config.smtp_password.clone(),
            ));
        }

        Ok(builder.build())
    }

    async fn send(&self, subject: &str, body: String) -> MonitorResult<()> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| MonitorError::channel_send("email", format!("bad from address: {}", e)))?;

        let transport = self.transport()?;
        for recipient in &self.config.recipients {
            let to: Mailbox = recipient.parse().map_err(|e| {
                MonitorError::channel_send("email", format!("bad recipient '{}': {}", recipient, e))
            })?;

            let message = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(subject)
                .body(body.clone())
                .map_err(|e| MonitorError::channel_send("email", e))?;

            transport
                .send(message)
                .await
                .map_err(|e| MonitorError::channel_send("email", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.smtp_host.is_empty()
    }

    async fn send_regression_alerts(&self, events: &[RegressionEvent]) -> MonitorResult<()> {
        let worst = events.iter().map(|e| e.severity).max();
        let subject = format!(
            "[planwatch] {} regression(s), worst severity {}",
            events.len(),
            worst.map(|s| s.as_str()).unwrap_or("low")
        );

        let mut body = String::new();
        for event in events {
            body.push_str(&format!(
                "{}/{} fingerprint {}: {} {} (baseline {:.0}, current {:.0}, +{:.1}%){}\n",
                event.instance_name,
                event.database_name,
                event.fingerprint_id,
                event.severity.as_str(),
                event.regression_type.as_str(),
                event.baseline_value,
                event.current_value,
                event.change_percent,
                if event.is_plan_change { " [plan change]" } else { "" },
            ));
        }

        self.send(&subject, body).await
    }

    async fn send_hotspot_summary(&self, hotspots: &[Hotspot]) -> MonitorResult<()> {
        let mut body = String::new();
        for hotspot in hotspots {
            body.push_str(&format!(
                "#{} {}/{} fingerprint {}: {:.1}% of {} ({} execs)\n",
                hotspot.rank,
                hotspot.instance_name,
                hotspot.database_name,
                hotspot.fingerprint_id,
                hotspot.percentage_of_total * 100.0,
                hotspot.metric_type.as_str(),
                hotspot.exec_count,
            ));
        }
        self.send("[planwatch] resource hotspots", body).await
    }

    async fn send_daily_summary(&self, summary: &DailySummary) -> MonitorResult<()> {
        let body = format!(
            "Events in window: {} (critical {}, high {}, medium {}, low {})\n\
             Plan changes: {}\nResolved: {}\nTargets monitored: {}\nTop hotspots: {}\n",
            summary.events.total_events,
            summary.events.critical,
            summary.events.high,
            summary.events.medium,
            summary.events.low,
            summary.events.plan_changes,
            summary.events.resolved,
            summary.targets_monitored,
            summary.top_hotspots.len(),
        );
        self.send("[planwatch] daily summary", body).await
    }

    async fn test_connection(&self) -> MonitorResult<()> {
        let transport = self.transport()?;
        transport
            .test_connection()
            .await
            .map_err(|e| MonitorError::channel_send("email", e))
            .and_then(|ok| {
                if ok {
                    Ok(())
                } else {
                    Err(MonitorError::channel_send("email", "SMTP connection test failed"))
                }
            })
    }
}
