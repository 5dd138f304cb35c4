use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of remediation a suggestion proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationType {
    ForcePlan,
    UpdateStatistics,
    ClearPlanCache,
    CreateIndex,
    ModifyIndex,
    AddQueryHint,
    DropIndex,
    RewriteQuery,
    SchemaChange,
    ConfigChange,
}

impl RemediationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForcePlan => "force_plan",
            Self::UpdateStatistics => "update_statistics",
            Self::ClearPlanCache => "clear_plan_cache",
            Self::CreateIndex => "create_index",
            Self::ModifyIndex => "modify_index",
            Self::AddQueryHint => "add_query_hint",
            Self::DropIndex => "drop_index",
            Self::RewriteQuery => "rewrite_query",
            Self::SchemaChange => "schema_change",
            Self::ConfigChange => "config_change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "force_plan" => Some(Self::ForcePlan),
            "update_statistics" => Some(Self::UpdateStatistics),
            "clear_plan_cache" => Some(Self::ClearPlanCache),
            "create_index" => Some(Self::CreateIndex),
            "modify_index" => Some(Self::ModifyIndex),
            "add_query_hint" => Some(Self::AddQueryHint),
            "drop_index" => Some(Self::DropIndex),
            "rewrite_query" => Some(Self::RewriteQuery),
            "schema_change" => Some(Self::SchemaChange),
            "config_change" => Some(Self::ConfigChange),
            _ => None,
        }
    }

    /// Safety is a function of the type alone; the advisor never upgrades it.
    pub fn safety(&self) -> SafetyLevel {
        match self {
            Self::ForcePlan | Self::UpdateStatistics | Self::ClearPlanCache => SafetyLevel::Safe,
            Self::CreateIndex | Self::ModifyIndex | Self::AddQueryHint => {
                SafetyLevel::RequiresReview
            },
            Self::DropIndex | Self::RewriteQuery | Self::SchemaChange | Self::ConfigChange => {
                SafetyLevel::ManualOnly
            },
        }
    }
}

/// Risk classification gating automatic execution. Only `Safe` suggestions
/// are ever eligible for the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Safe,
    RequiresReview,
    ManualOnly,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::RequiresReview => "requires_review",
            Self::ManualOnly => "manual_only",
        }
    }
}

/// A typed, safety-classified remediation proposal for a regression event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationSuggestion {
    pub regression_event_id: String,
    pub suggestion_type: RemediationType,
    pub safety: SafetyLevel,
    /// Advisor confidence in [0, 1].
    pub confidence: f64,
    pub title: String,
    pub description: String,
    pub rationale: String,
    /// Templated script, present only when the action is expressible as SQL.
    pub action_script: Option<String>,
    /// 1 is highest.
    pub priority: u32,
}

/// Why the executor declined to run a suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    RemediationDisabled,
    ProductionTarget,
    UnsafeSuggestion(SafetyLevel),
    TypeNotAllowed(String),
    EmptyScript,
    DenylistedToken(String),
    AlreadyApplied,
}

impl std::fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemediationDisabled => write!(f, "enable_remediation=false"),
            Self::ProductionTarget => {
                write!(f, "production target and allow_production_remediation=false")
            },
            Self::UnsafeSuggestion(level) => {
                write!(f, "safety level '{}' is not eligible for automatic execution", level.as_str())
            },
            Self::TypeNotAllowed(ty) => write!(f, "type '{}' not in auto_execute_types", ty),
            Self::EmptyScript => write!(f, "suggestion has no action script"),
            Self::DenylistedToken(token) => write!(f, "script contains denylisted token '{}'", token),
            Self::AlreadyApplied => write!(f, "suggestion was already applied to this fingerprint"),
        }
    }
}

/// Outcome of one executor invocation. Refusals and failures are values,
/// never errors; every variant is audited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemediationOutcome {
    Executed { rows_affected: u64, duration_ms: i64 },
    DryRun,
    Refused(RefusalReason),
    Failed { error: String, duration_ms: i64 },
}

impl RemediationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Executed { .. } | Self::DryRun)
    }
}

/// Append-only record of an execution attempt, including refusals and
/// dry runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAudit {
    pub id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub instance_name: String,
    pub database_name: String,
    pub fingerprint_id: i64,
    pub suggestion_type: RemediationType,
    pub script: String,
    pub is_dry_run: bool,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub initiated_by: String,
}
