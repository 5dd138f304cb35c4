use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stable identity of a logically-equivalent query family.
///
/// `hash` is the sole identity: two SQL texts that differ only in literals,
/// whitespace or comments share one fingerprint row. The normalized and
/// sample texts are descriptive.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fingerprint {
    pub id: i64,
    /// Hex-encoded 16-byte hash of the normalized text. Unique system-wide.
    pub hash: String,
    pub normalized_text: String,
    /// Original SQL, truncated to 4 KiB with an ellipsis marker.
    pub sample_text: String,
    pub first_seen_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    pub instance_name: String,
    pub database_name: String,
    /// Engine-native query hash, carried as a hint only, never as identity.
    pub native_hash_hint: Option<String>,
}

/// Output of the fingerprinter: identity material without storage concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryIdentity {
    pub hash: String,
    pub normalized_text: String,
    pub sample_text: String,
}

/// Identity of a cached execution plan, attached to samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanIdentity {
    pub plan_hash: Option<String>,
    pub vendor_plan_id: Option<i64>,
    pub is_forced: bool,
}
