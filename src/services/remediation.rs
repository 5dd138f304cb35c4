//! Remediation executor.
//!
//! Runs `safe` suggestions against the target database behind a layered
//! gate sequence. Refusals are structured results, never errors, and every
//! invocation writes exactly one audit row: executions, dry runs, failures
//! and refusals alike.

use crate::config::RemediationConfig;
use crate::models::{
    RefusalReason, RemediationAudit, RemediationOutcome, RemediationSuggestion, SafetyLevel,
    Target,
};
use crate::services::pool_manager::TargetPoolManager;
use crate::services::store::AuditRepo;
use crate::utils::MonitorResult;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Tokens that must never appear in an auto-executed script, matched
/// case-insensitively as substrings. DELETE is handled separately with a
/// missing-WHERE heuristic.
const DENYLIST: &[&str] = &[
    "DROP",
    "TRUNCATE",
    "SHUTDOWN",
    "XP_CMDSHELL",
    "SP_CONFIGURE",
    "ALTER SYSTEM",
    "GRANT",
    "REVOKE",
];

pub struct RemediationExecutor {
    pools: Arc<TargetPoolManager>,
    audit: AuditRepo,
    config: RemediationConfig,
    auto_execute_types: Vec<crate::models::RemediationType>,
}

impl RemediationExecutor {
    pub fn new(
        pools: Arc<TargetPoolManager>,
        audit: AuditRepo,
        config: RemediationConfig,
        auto_execute_types: Vec<crate::models::RemediationType>,
    ) -> Self {
        Self { pools, audit, config, auto_execute_types }
    }

    /// Run one suggestion through the gates and, if every gate passes,
    /// against the target. The returned `Err` only ever means the audit
    /// store itself failed; operational outcomes are values.
    pub async fn execute(
        &self,
        target: &Target,
        fingerprint_id: i64,
        suggestion: &RemediationSuggestion,
        initiated_by: &str,
        dry_run: bool,
    ) -> MonitorResult<RemediationOutcome> {
        let script = suggestion.action_script.clone().unwrap_or_default();

        if let Some(reason) = self.refusal_for(target, fingerprint_id, suggestion, &script).await?
        {
            warn!(
                target_key = %target.key(),
                fingerprint_id,
                suggestion_type = suggestion.suggestion_type.as_str(),
                reason = %reason,
                "remediation refused"
            );
            let outcome = RemediationOutcome::Refused(reason.clone());
            self.audit_outcome(target, fingerprint_id, suggestion, &script, false, &outcome, initiated_by)
                .await?;
            return Ok(outcome);
        }

        let effective_dry_run = dry_run || self.config.dry_run;
        if effective_dry_run {
            info!(
                target_key = %target.key(),
                fingerprint_id,
                suggestion_type = suggestion.suggestion_type.as_str(),
                "dry run, script not executed"
            );
            let outcome = RemediationOutcome::DryRun;
            self.audit_outcome(target, fingerprint_id, suggestion, &script, true, &outcome, initiated_by)
                .await?;
            return Ok(outcome);
        }

        let outcome = self.run_script(target, &script).await;
        self.audit_outcome(target, fingerprint_id, suggestion, &script, false, &outcome, initiated_by)
            .await?;
        Ok(outcome)
    }

    /// The gate sequence. First failing gate wins.
    async fn refusal_for(
        &self,
        target: &Target,
        fingerprint_id: i64,
        suggestion: &RemediationSuggestion,
        script: &str,
    ) -> MonitorResult<Option<RefusalReason>> {
        if !self.config.enable_remediation {
            return Ok(Some(RefusalReason::RemediationDisabled));
        }
        if target.is_production && !self.config.allow_production_remediation {
            return Ok(Some(RefusalReason::ProductionTarget));
        }
        if suggestion.safety != SafetyLevel::Safe {
            return Ok(Some(RefusalReason::UnsafeSuggestion(suggestion.safety)));
        }
        if !self.auto_execute_types.contains(&suggestion.suggestion_type) {
            return Ok(Some(RefusalReason::TypeNotAllowed(
                suggestion.suggestion_type.as_str().to_string(),
            )));
        }
        if script.trim().is_empty() {
            return Ok(Some(RefusalReason::EmptyScript));
        }
        if let Some(token) = denylisted_token(script) {
            return Ok(Some(RefusalReason::DenylistedToken(token)));
        }
        if !self.config.allow_reapply
            && self
                .audit
                .was_applied(
                    &target.instance_name,
                    &target.database_name,
                    fingerprint_id,
                    suggestion.suggestion_type,
                )
                .await?
        {
            return Ok(Some(RefusalReason::AlreadyApplied));
        }
        Ok(None)
    }

    async fn run_script(&self, target: &Target, script: &str) -> RemediationOutcome {
        let started = std::time::Instant::now();
        let deadline = Duration::from_secs(self.config.command_timeout_seconds);

        let client = match self.pools.client(target) {
            Ok(client) => client,
            Err(e) => {
                return RemediationOutcome::Failed {
                    error: e.to_string(),
                    duration_ms: started.elapsed().as_millis() as i64,
                };
            },
        };

        match tokio::time::timeout(deadline, client.execute(script)).await {
            Ok(Ok(rows_affected)) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                info!(
                    target_key = %target.key(),
                    rows_affected,
                    duration_ms,
                    "remediation script executed"
                );
                RemediationOutcome::Executed { rows_affected, duration_ms }
            },
            Ok(Err(e)) => RemediationOutcome::Failed {
                error: e.to_string(),
                duration_ms: started.elapsed().as_millis() as i64,
            },
            Err(_) => RemediationOutcome::Failed {
                error: format!(
                    "timed out after {}s",
                    self.config.command_timeout_seconds
                ),
                duration_ms: started.elapsed().as_millis() as i64,
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit_outcome(
        &self,
        target: &Target,
        fingerprint_id: i64,
        suggestion: &RemediationSuggestion,
        script: &str,
        is_dry_run: bool,
        outcome: &RemediationOutcome,
        initiated_by: &str,
    ) -> MonitorResult<()> {
        let (success, error, duration_ms) = match outcome {
            RemediationOutcome::Executed { duration_ms, .. } => (true, None, *duration_ms),
            RemediationOutcome::DryRun => (true, None, 0),
            RemediationOutcome::Refused(reason) => (false, Some(reason.to_string()), 0),
            RemediationOutcome::Failed { error, duration_ms } => {
                (false, Some(error.clone()), *duration_ms)
            },
        };

        self.audit
            .append(&RemediationAudit {
                id: Uuid::new_v4().to_string(),
                timestamp_utc: Utc::now(),
                instance_name: target.instance_name.clone(),
                database_name: target.database_name.clone(),
                fingerprint_id,
                suggestion_type: suggestion.suggestion_type,
                script: script.to_string(),
                is_dry_run,
                success,
                error,
                duration_ms,
                initiated_by: initiated_by.to_string(),
            })
            .await
    }
}

/// First denylisted token found in the script, if any. DELETE is allowed
/// only when a WHERE clause follows it.
fn denylisted_token(script: &str) -> Option<String> {
    let upper = script.to_uppercase();

    for token in DENYLIST {
        if upper.contains(token) {
            return Some((*token).to_string());
        }
    }

    if let Some(delete_pos) = upper.find("DELETE") {
        let after = &upper[delete_pos..];
        if !after.contains("WHERE") {
            return Some("DELETE".to_string());
        }
    }

    None
}
