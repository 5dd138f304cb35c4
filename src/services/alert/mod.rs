//! Alert gateway.
//!
//! Fans events out to every enabled channel while preventing alert storms:
//! a per-(channel, fingerprint, type) cooldown suppresses repeats unless
//! severity increased, and a per-channel hourly cap bounds total outbound
//! traffic. Channel failures are isolated and counted; one broken webhook
//! never blocks the others.

pub mod email;
pub mod log;
pub mod webhook;

use crate::models::{DailySummary, Hotspot, RegressionEvent, RegressionType, Severity};
use crate::utils::MonitorResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Outbound notification surface. Implementations must be cheap to call
/// when disabled; the gateway checks `is_enabled` before every dispatch.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
    async fn send_regression_alerts(&self, events: &[RegressionEvent]) -> MonitorResult<()>;
    async fn send_hotspot_summary(&self, hotspots: &[Hotspot]) -> MonitorResult<()>;
    async fn send_daily_summary(&self, summary: &DailySummary) -> MonitorResult<()>;
    async fn test_connection(&self) -> MonitorResult<()>;
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub cooldown_minutes: i64,
    pub max_alerts_per_hour: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self { cooldown_minutes: 15, max_alerts_per_hour: 10 }
    }
}

type CooldownKey = (String, i64, RegressionType);

pub struct AlertGateway {
    channels: Vec<Arc<dyn AlertChannel>>,
    settings: GatewaySettings,
    /// Last send time and severity per cooldown key. Short critical
    /// sections only; never held across an await.
    cooldowns: Mutex<HashMap<CooldownKey, (DateTime<Utc>, Severity)>>,
    /// Send timestamps per channel inside the sliding hour.
    hourly_sends: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    rate_limited: DashMap<String, u64>,
    failures: DashMap<String, u64>,
}

impl AlertGateway {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>, settings: GatewaySettings) -> Self {
        Self {
            channels,
            settings,
            cooldowns: Mutex::new(HashMap::new()),
            hourly_sends: Mutex::new(HashMap::new()),
            rate_limited: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Route regression events to all enabled channels, applying cooldown
    /// and hourly-cap suppression per channel.
    pub async fn dispatch_regressions(&self, events: &[RegressionEvent]) {
        if events.is_empty() {
            return;
        }

        for channel in &self.channels {
            if !channel.is_enabled() {
                continue;
            }

            let now = Utc::now();
            let (to_send, capped) = self.filter_for_channel(channel.name(), events, now);

            if capped {
                *self
                    .rate_limited
                    .entry(channel.name().to_string())
                    .or_insert(0) += 1;
                debug!(channel = channel.name(), "hourly alert cap reached, suppressing");
            }
            if to_send.is_empty() {
                continue;
            }

            match channel.send_regression_alerts(&to_send).await {
                Ok(()) => {
                    self.record_sends(channel.name(), &to_send, now);
                    info!(channel = channel.name(), count = to_send.len(), "alerts sent");
                },
                Err(e) => {
                    *self
                        .failures
                        .entry(channel.name().to_string())
                        .or_insert(0) += 1;
                    warn!(channel = channel.name(), error = %e, "channel send failed");
                },
            }
        }
    }

    /// Apply cooldown and cap rules for one channel. Returns the surviving
    /// events and whether the hourly cap suppressed anything.
    fn filter_for_channel(
        &self,
        channel: &str,
        events: &[RegressionEvent],
        now: DateTime<Utc>,
    ) -> (Vec<RegressionEvent>, bool) {
        let cooldown = Duration::minutes(self.settings.cooldown_minutes);
        let hour_ago = now - Duration::hours(1);

        let cooldowns = self.cooldowns.lock().expect("cooldown lock poisoned");
        let mut hourly = self.hourly_sends.lock().expect("hourly lock poisoned");

        let sent_this_hour = {
            let entries = hourly.entry(channel.to_string()).or_default();
            entries.retain(|t| *t > hour_ago);
            entries.len()
        };

        let mut budget = self.settings.max_alerts_per_hour.saturating_sub(sent_this_hour);
        let mut capped = false;
        let mut to_send = Vec::new();

        for event in events {
            let key = (channel.to_string(), event.fingerprint_id, event.regression_type);
            if let Some((last_sent, last_severity)) = cooldowns.get(&key)
                && now - *last_sent < cooldown
                && event.severity <= *last_severity
            {
                debug!(
                    channel,
                    fingerprint_id = event.fingerprint_id,
                    regression_type = event.regression_type.as_str(),
                    "suppressed by cooldown"
                );
                continue;
            }

            if budget == 0 {
                capped = true;
                continue;
            }
            budget -= 1;
            to_send.push(event.clone());
        }

        (to_send, capped)
    }

    fn record_sends(&self, channel: &str, sent: &[RegressionEvent], now: DateTime<Utc>) {
        let mut cooldowns = self.cooldowns.lock().expect("cooldown lock poisoned");
        let mut hourly = self.hourly_sends.lock().expect("hourly lock poisoned");

        for event in sent {
            cooldowns.insert(
                (channel.to_string(), event.fingerprint_id, event.regression_type),
                (now, event.severity),
            );
            hourly.entry(channel.to_string()).or_default().push(now);
        }
    }

    /// Hotspot summaries bypass cooldowns; they are already periodic.
    pub async fn dispatch_hotspots(&self, hotspots: &[Hotspot]) {
        if hotspots.is_empty() {
            return;
        }
        for channel in &self.channels {
            if !channel.is_enabled() {
                continue;
            }
            if let Err(e) = channel.send_hotspot_summary(hotspots).await {
                *self
                    .failures
                    .entry(channel.name().to_string())
                    .or_insert(0) += 1;
                warn!(channel = channel.name(), error = %e, "hotspot summary failed");
            }
        }
    }

    pub async fn dispatch_daily_summary(&self, summary: &DailySummary) {
        for channel in &self.channels {
            if !channel.is_enabled() {
                continue;
            }
            if let Err(e) = channel.send_daily_summary(summary).await {
                *self
                    .failures
                    .entry(channel.name().to_string())
                    .or_insert(0) += 1;
                warn!(channel = channel.name(), error = %e, "daily summary failed");
            }
        }
    }

    /// Probe every enabled channel. Returns (name, result) pairs.
    pub async fn test_all(&self) -> Vec<(String, MonitorResult<()>)> {
        let mut results = Vec::new();
        for channel in &self.channels {
            if !channel.is_enabled() {
                continue;
            }
            let result = channel.test_connection().await;
            results.push((channel.name().to_string(), result));
        }
        results
    }

    pub fn failure_count(&self, channel: &str) -> u64 {
        self.failures.get(channel).map(|c| *c).unwrap_or(0)
    }

    pub fn rate_limited_count(&self, channel: &str) -> u64 {
        self.rate_limited.get(channel).map(|c| *c).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct RecordingChannel {
        name: String,
        enabled: bool,
        fail: AtomicBool,
        batches: Mutex<Vec<Vec<RegressionEvent>>>,
        summaries: AtomicUsize,
    }

    impl RecordingChannel {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                enabled: true,
                fail: AtomicBool::new(false),
                batches: Mutex::new(Vec::new()),
                summaries: AtomicUsize::new(0),
            })
        }

        fn sent_events(&self) -> usize {
            self.batches.lock().unwrap().iter().map(|b| b.len()).sum()
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        async fn send_regression_alerts(&self, events: &[RegressionEvent]) -> MonitorResult<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(crate::utils::MonitorError::channel_send(&self.name, "boom"));
            }
            self.batches.lock().unwrap().push(events.to_vec());
            Ok(())
        }
        async fn send_hotspot_summary(&self, _hotspots: &[Hotspot]) -> MonitorResult<()> {
            Ok(())
        }
        async fn send_daily_summary(&self, _summary: &DailySummary) -> MonitorResult<()> {
            self.summaries.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn test_connection(&self) -> MonitorResult<()> {
            Ok(())
        }
    }

    fn event(fingerprint_id: i64, severity: Severity) -> RegressionEvent {
        RegressionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint_id,
            instance_name: "i1".into(),
            database_name: "d1".into(),
            detected_at_utc: Utc::now(),
            regression_type: RegressionType::Duration,
            metric_name: "p95_duration_us".into(),
            baseline_value: 1.0,
            current_value: 2.0,
            change_percent: 100.0,
            severity,
            is_plan_change: false,
            baseline_plan_hash: None,
            current_plan_hash: None,
            status: EventStatus::New,
            acknowledged_by: None,
            acknowledged_at_utc: None,
            resolved_by: None,
            resolved_at_utc: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_equal_severity() {
        let channel = RecordingChannel::new("rec");
        let gateway = AlertGateway::new(
            vec![channel.clone()],
            GatewaySettings { cooldown_minutes: 15, max_alerts_per_hour: 100 },
        );

        gateway.dispatch_regressions(&[event(1, Severity::Medium)]).await;
        gateway.dispatch_regressions(&[event(1, Severity::Medium)]).await;

        assert_eq!(channel.sent_events(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_overridden_by_severity_increase() {
        let channel = RecordingChannel::new("rec");
        let gateway = AlertGateway::new(
            vec![channel.clone()],
            GatewaySettings { cooldown_minutes: 15, max_alerts_per_hour: 100 },
        );

        gateway.dispatch_regressions(&[event(1, Severity::Medium)]).await;
        gateway.dispatch_regressions(&[event(1, Severity::Critical)]).await;

        assert_eq!(channel.sent_events(), 2);
    }

    #[tokio::test]
    async fn test_hourly_cap() {
        let channel = RecordingChannel::new("rec");
        let gateway = AlertGateway::new(
            vec![channel.clone()],
            GatewaySettings { cooldown_minutes: 0, max_alerts_per_hour: 3 },
        );

        let events: Vec<RegressionEvent> =
            (0..10).map(|i| event(i, Severity::Low)).collect();
        gateway.dispatch_regressions(&events).await;

        assert_eq!(channel.sent_events(), 3);
        assert_eq!(gateway.rate_limited_count("rec"), 1);
    }

    #[tokio::test]
    async fn test_channel_failure_isolation() {
        let bad = RecordingChannel::new("bad");
        bad.fail.store(true, Ordering::Relaxed);
        let good = RecordingChannel::new("good");

        let gateway = AlertGateway::new(
            vec![bad.clone(), good.clone()],
            GatewaySettings::default(),
        );
        gateway.dispatch_regressions(&[event(1, Severity::High)]).await;

        assert_eq!(good.sent_events(), 1);
        assert_eq!(gateway.failure_count("bad"), 1);
        assert_eq!(gateway.failure_count("good"), 0);
    }

    #[tokio::test]
    async fn test_disabled_channel_skipped() {
        let channel = Arc::new(RecordingChannel {
            name: "off".into(),
            enabled: false,
            fail: AtomicBool::new(false),
            batches: Mutex::new(Vec::new()),
            summaries: AtomicUsize::new(0),
        });
        let gateway = AlertGateway::new(vec![channel.clone()], GatewaySettings::default());

        gateway.dispatch_regressions(&[event(1, Severity::High)]).await;
        let results = gateway.test_all().await;

        assert_eq!(channel.sent_events(), 0);
        assert!(results.is_empty());
    }
}
