use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which metric (or structural change) triggered a regression event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionType {
    Duration,
    Cpu,
    LogicalReads,
    PlanChange,
    MultiMetric,
}

impl RegressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duration => "duration",
            Self::Cpu => "cpu",
            Self::LogicalReads => "logical_reads",
            Self::PlanChange => "plan_change",
            Self::MultiMetric => "multi_metric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "duration" => Some(Self::Duration),
            "cpu" => Some(Self::Cpu),
            "logical_reads" => Some(Self::LogicalReads),
            "plan_change" => Some(Self::PlanChange),
            "multi_metric" => Some(Self::MultiMetric),
            _ => None,
        }
    }
}

/// Event severity, ordered so that comparisons mean "at least as severe"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Event lifecycle state. `Resolved` and `Dismissed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    New,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    /// Allowed transitions:
    /// new -> acknowledged | resolved | dismissed,
    /// acknowledged -> resolved. Everything else is rejected.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Acknowledged)
                | (Self::New, Self::Resolved)
                | (Self::New, Self::Dismissed)
                | (Self::Acknowledged, Self::Resolved)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::Acknowledged)
    }
}

/// A detected per-query performance regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionEvent {
    pub id: String,
    pub fingerprint_id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub detected_at_utc: DateTime<Utc>,
    pub regression_type: RegressionType,
    pub metric_name: String,
    pub baseline_value: f64,
    pub current_value: f64,
    pub change_percent: f64,
    pub severity: Severity,
    pub is_plan_change: bool,
    pub baseline_plan_hash: Option<String>,
    pub current_plan_hash: Option<String>,
    pub status: EventStatus,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at_utc: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at_utc: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Resource dimension used for hotspot ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    Cpu,
    Duration,
    LogicalReads,
    Executions,
}

impl RankingMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Duration => "duration",
            Self::LogicalReads => "logical_reads",
            Self::Executions => "executions",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu" => Some(Self::Cpu),
            "duration" => Some(Self::Duration),
            "logical_reads" => Some(Self::LogicalReads),
            "executions" => Some(Self::Executions),
            _ => None,
        }
    }
}

/// A query consuming a disproportionate share of one resource in a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hotspot {
    pub fingerprint_id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub window_start_utc: DateTime<Utc>,
    pub window_end_utc: DateTime<Utc>,
    pub rank: usize,
    pub metric_type: RankingMetric,
    pub total_metric_value: f64,
    pub avg_metric_value: f64,
    pub exec_count: i64,
    /// This query's share of the window total for the metric, in [0, 1].
    pub percentage_of_total: f64,
}

/// Aggregated event counts for the daily summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSummary {
    pub window_start_utc: Option<DateTime<Utc>>,
    pub window_end_utc: Option<DateTime<Utc>>,
    pub total_events: i64,
    pub new_events: i64,
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub plan_changes: i64,
    pub resolved: i64,
}

/// Payload for the once-a-day summary notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub generated_at_utc: DateTime<Utc>,
    pub events: EventSummary,
    pub top_hotspots: Vec<Hotspot>,
    pub targets_monitored: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(EventStatus::New.can_transition_to(EventStatus::Acknowledged));
        assert!(EventStatus::New.can_transition_to(EventStatus::Resolved));
        assert!(EventStatus::New.can_transition_to(EventStatus::Dismissed));
        assert!(EventStatus::Acknowledged.can_transition_to(EventStatus::Resolved));

        // Terminal states accept nothing
        assert!(!EventStatus::Resolved.can_transition_to(EventStatus::Acknowledged));
        assert!(!EventStatus::Dismissed.can_transition_to(EventStatus::Resolved));
        // No ack after dismiss/resolve, no dismiss after ack
        assert!(!EventStatus::Acknowledged.can_transition_to(EventStatus::Dismissed));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_enum_round_trips() {
        for ty in [
            RegressionType::Duration,
            RegressionType::Cpu,
            RegressionType::LogicalReads,
            RegressionType::PlanChange,
            RegressionType::MultiMetric,
        ] {
            assert_eq!(RegressionType::parse(ty.as_str()), Some(ty));
        }
        for st in [
            EventStatus::New,
            EventStatus::Acknowledged,
            EventStatus::Resolved,
            EventStatus::Dismissed,
        ] {
            assert_eq!(EventStatus::parse(st.as_str()), Some(st));
        }
    }
}
