//! Log channel: always-on delivery through tracing.
//!
//! Deployments without webhook or SMTP configuration still see every alert
//! in the daemon's own log stream.

use super::AlertChannel;
use crate::models::{DailySummary, Hotspot, RegressionEvent};
use crate::utils::MonitorResult;
use async_trait::async_trait;
use tracing::{info, warn};

pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send_regression_alerts(&self, events: &[RegressionEvent]) -> MonitorResult<()> {
        for event in events {
            warn!(
                target_key = format!("{}/{}", event.instance_name, event.database_name),
                fingerprint_id = event.fingerprint_id,
                regression_type = event.regression_type.as_str(),
                severity = event.severity.as_str(),
                metric = %event.metric_name,
                baseline = event.baseline_value,
                current = event.current_value,
                change_percent = format!("{:.1}", event.change_percent),
                plan_change = event.is_plan_change,
                "query regression detected"
            );
        }
        Ok(())
    }

    async fn send_hotspot_summary(&self, hotspots: &[Hotspot]) -> MonitorResult<()> {
        for hotspot in hotspots {
            info!(
                target_key = format!("{}/{}", hotspot.instance_name, hotspot.database_name),
                rank = hotspot.rank,
                fingerprint_id = hotspot.fingerprint_id,
                metric = hotspot.metric_type.as_str(),
                share = format!("{:.1}%", hotspot.percentage_of_total * 100.0),
                execs = hotspot.exec_count,
                "resource hotspot"
            );
        }
        Ok(())
    }

    async fn send_daily_summary(&self, summary: &DailySummary) -> MonitorResult<()> {
        info!(
            total = summary.events.total_events,
            critical = summary.events.critical,
            high = summary.events.high,
            medium = summary.events.medium,
            low = summary.events.low,
            plan_changes = summary.events.plan_changes,
            resolved = summary.events.resolved,
            targets = summary.targets_monitored,
            "daily summary"
        );
        Ok(())
    }

    async fn test_connection(&self) -> MonitorResult<()> {
        Ok(())
    }
}
