use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-target outcome of one collection cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetCollectionResult {
    pub instance_name: String,
    pub database_name: String,
    pub success: bool,
    pub rows_observed: usize,
    pub samples_written: usize,
    pub new_fingerprints: usize,
    pub counter_resets: usize,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Per-instance rollup of target results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCollectionResult {
    pub instance_name: String,
    /// Set when the instance could not be reached at all; its databases are
    /// then reported as failed without individual attempts.
    pub connect_error: Option<String>,
    pub targets: Vec<TargetCollectionResult>,
}

/// Outcome of one full collection tick across all enabled targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRunSummary {
    pub started_at_utc: DateTime<Utc>,
    pub finished_at_utc: DateTime<Utc>,
    pub targets_total: usize,
    pub targets_succeeded: usize,
    pub targets_failed: usize,
    pub samples_written: usize,
    pub samples_purged: u64,
    pub instances: Vec<InstanceCollectionResult>,
}

impl CollectionRunSummary {
    pub fn is_full_success(&self) -> bool {
        self.targets_failed == 0
    }
}

/// Per-target outcome of one analysis cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetAnalysisResult {
    pub instance_name: String,
    pub database_name: String,
    pub success: bool,
    pub fingerprints_analyzed: usize,
    pub events_created: usize,
    pub events_escalated: usize,
    pub hotspots_found: usize,
    pub error: Option<String>,
}

/// Outcome of one full analysis tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRunSummary {
    pub started_at_utc: DateTime<Utc>,
    pub finished_at_utc: DateTime<Utc>,
    pub targets_total: usize,
    pub targets_failed: usize,
    pub events_created: usize,
    pub targets: Vec<TargetAnalysisResult>,
}

impl AnalysisRunSummary {
    pub fn is_full_success(&self) -> bool {
        self.targets_failed == 0
    }
}
