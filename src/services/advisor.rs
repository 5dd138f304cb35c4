//! Remediation advisor.
//!
//! Maps a regression event to a prioritized list of typed suggestions.
//! Safety always derives from the suggestion type; the advisor only decides
//! which types apply and in what order. Scripts are canned templates filled
//! with table names recovered from the query's sample text where possible.

use crate::models::{
    RegressionEvent, RegressionType, RemediationSuggestion, RemediationType, Severity,
};
use once_cell::sync::Lazy;
use regex::Regex;

static TABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:FROM|JOIN|INTO|UPDATE)\s+`?\[?([A-Za-z0-9_.]+)\]?`?").unwrap());

#[derive(Debug, Clone, Default)]
pub struct RemediationAdvisor;

impl RemediationAdvisor {
    pub fn new() -> Self {
        Self
    }

    /// Propose suggestions for an event, best first. `sample_sql` is the
    /// fingerprint's stored sample text, used only to fill script templates.
    pub fn advise(
        &self,
        event: &RegressionEvent,
        sample_sql: Option<&str>,
    ) -> Vec<RemediationSuggestion> {
        let mut suggestions = Vec::new();
        let tables = sample_sql.map(extract_tables).unwrap_or_default();
        let ratio = 1.0 + event.change_percent / 100.0;

        // Escalation first: a severe multi-metric regression is not a
        // script-fixable situation.
        if event.regression_type == RegressionType::MultiMetric && event.severity >= Severity::High
        {
            suggestions.push(self.manual_escalation(event));
            return with_priorities(suggestions);
        }

        if event.is_plan_change || event.regression_type == RegressionType::PlanChange {
            suggestions.push(self.force_prior_plan(event));
            suggestions.push(self.clear_plan_cache(event));
        }

        match event.regression_type {
            RegressionType::Duration | RegressionType::Cpu if ratio < 3.0 => {
                suggestions.push(self.update_statistics(event, &tables));
            },
            RegressionType::Cpu => {
                // Heavier CPU regressions still get stale-statistics as a
                // follow-up after the plan actions.
                suggestions.push(self.update_statistics(event, &tables));
            },
            RegressionType::LogicalReads if ratio >= 2.0 => {
                suggestions.push(self.create_index_template(event, &tables));
            },
            _ => {},
        }

        if suggestions.is_empty() {
            suggestions.push(self.update_statistics(event, &tables));
        }

        with_priorities(suggestions)
    }

    fn force_prior_plan(&self, event: &RegressionEvent) -> RemediationSuggestion {
        let prior = event.baseline_plan_hash.as_deref().unwrap_or("unknown");
        RemediationSuggestion {
            regression_event_id: event.id.clone(),
            suggestion_type: RemediationType::ForcePlan,
            safety: RemediationType::ForcePlan.safety(),
            confidence: 0.8,
            title: "Force the previously stable plan".to_string(),
            description: format!(
                "The query shifted away from its typical plan {}. Forcing the prior plan \
                 restores the known-good shape while the cause is investigated.",
                prior
            ),
            rationale: "Plan regressions are usually cheaper to pin than to re-optimize."
                .to_string(),
            action_script: None,
            priority: 0,
        }
    }

    fn clear_plan_cache(&self, event: &RegressionEvent) -> RemediationSuggestion {
        RemediationSuggestion {
            regression_event_id: event.id.clone(),
            suggestion_type: RemediationType::ClearPlanCache,
            safety: RemediationType::ClearPlanCache.safety(),
            confidence: 0.5,
            title: "Evict the cached plan".to_string(),
            description: "Evicting the regressed plan lets the optimizer recompile with \
                          current statistics."
                .to_string(),
            rationale: "A recompile often recovers from parameter-sniffing style plan flips."
                .to_string(),
            action_script: Some("DBCC FREEPROCCACHE;".to_string()),
            priority: 0,
        }
    }

    fn update_statistics(
        &self,
        event: &RegressionEvent,
        tables: &[String],
    ) -> RemediationSuggestion {
        let action_script = if tables.is_empty() {
            None
        } else {
            Some(
                tables
                    .iter()
                    .map(|t| format!("UPDATE STATISTICS {};", t))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        };

        RemediationSuggestion {
            regression_event_id: event.id.clone(),
            suggestion_type: RemediationType::UpdateStatistics,
            safety: RemediationType::UpdateStatistics.safety(),
            confidence: 0.7,
            title: "Refresh optimizer statistics".to_string(),
            description: format!(
                "{} drifted {:.0}% above baseline; stale statistics are the most common \
                 cause of moderate regressions.",
                event.metric_name, event.change_percent
            ),
            rationale: "Statistics refresh is cheap and safe, and often corrects cardinality \
                        misestimates."
                .to_string(),
            action_script,
            priority: 0,
        }
    }

    fn create_index_template(
        &self,
        event: &RegressionEvent,
        tables: &[String],
    ) -> RemediationSuggestion {
        let table = tables.first().map(String::as_str).unwrap_or("<table>");
        RemediationSuggestion {
            regression_event_id: event.id.clone(),
            suggestion_type: RemediationType::CreateIndex,
            safety: RemediationType::CreateIndex.safety(),
            confidence: 0.4,
            title: format!("Consider a covering index on {}", table),
            description: format!(
                "Logical reads rose {:.0}% above baseline, which usually means a scan \
                 where a seek used to happen.",
                event.change_percent
            ),
            rationale: "Requires review: index shape depends on the workload's predicates."
                .to_string(),
            action_script: Some(format!(
                "CREATE INDEX IX_{}_suggested ON {} (/* predicate columns */);",
                table.replace('.', "_"),
                table
            )),
            priority: 0,
        }
    }

    fn manual_escalation(&self, event: &RegressionEvent) -> RemediationSuggestion {
        RemediationSuggestion {
            regression_event_id: event.id.clone(),
            suggestion_type: RemediationType::RewriteQuery,
            safety: RemediationType::RewriteQuery.safety(),
            confidence: 0.3,
            title: "Escalate for manual investigation".to_string(),
            description: format!(
                "Multiple metrics regressed at {} severity; no single scripted action \
                 is likely to help.",
                event.severity.as_str()
            ),
            rationale: "Broad regressions usually trace to data growth, schema drift or \
                        workload change."
                .to_string(),
            action_script: None,
            priority: 0,
        }
    }
}

fn with_priorities(mut suggestions: Vec<RemediationSuggestion>) -> Vec<RemediationSuggestion> {
    for (idx, suggestion) in suggestions.iter_mut().enumerate() {
        suggestion.priority = idx as u32 + 1;
    }
    suggestions
}

/// Table names mentioned in FROM/JOIN/INTO/UPDATE clauses, deduplicated.
fn extract_tables(sql: &str) -> Vec<String> {
    let mut tables = Vec::new();
    for cap in TABLE_PATTERN.captures_iter(sql) {
        if let Some(m) = cap.get(1) {
            let name = m.as_str().to_string();
            if !tables.contains(&name) {
                tables.push(name);
            }
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;
    use chrono::Utc;

    fn event(ty: RegressionType, change_percent: f64, severity: Severity) -> RegressionEvent {
        RegressionEvent {
            id: "e1".into(),
            fingerprint_id: 1,
            instance_name: "i1".into(),
            database_name: "d1".into(),
            detected_at_utc: Utc::now(),
            regression_type: ty,
            metric_name: "p95_duration_us".into(),
            baseline_value: 1_000_000.0,
            current_value: 1_000_000.0 * (1.0 + change_percent / 100.0),
            change_percent,
            severity,
            is_plan_change: false,
            baseline_plan_hash: Some("0xAAA".into()),
            current_plan_hash: Some("0xBBB".into()),
            status: EventStatus::New,
            acknowledged_by: None,
            acknowledged_at_utc: None,
            resolved_by: None,
            resolved_at_utc: None,
            notes: None,
        }
    }

    #[test]
    fn test_plan_change_ordering() {
        let advisor = RemediationAdvisor::new();
        let mut e = event(RegressionType::PlanChange, 0.0, Severity::Low);
        e.is_plan_change = true;

        let suggestions = advisor.advise(&e, None);
        assert!(suggestions.len() >= 2);
        assert_eq!(suggestions[0].suggestion_type, RemediationType::ForcePlan);
        assert_eq!(suggestions[1].suggestion_type, RemediationType::ClearPlanCache);
        assert_eq!(suggestions[0].priority, 1);
        assert_eq!(suggestions[1].priority, 2);
    }

    #[test]
    fn test_moderate_duration_gets_statistics() {
        let advisor = RemediationAdvisor::new();
        let suggestions = advisor.advise(
            &event(RegressionType::Duration, 60.0, Severity::Low),
            Some("SELECT * FROM dbo.Orders o JOIN dbo.Customers c ON c.id = o.cid"),
        );

        assert_eq!(suggestions[0].suggestion_type, RemediationType::UpdateStatistics);
        let script = suggestions[0].action_script.as_deref().unwrap();
        assert!(script.contains("UPDATE STATISTICS dbo.Orders;"));
        assert!(script.contains("UPDATE STATISTICS dbo.Customers;"));
    }

    #[test]
    fn test_reads_regression_requires_review() {
        let advisor = RemediationAdvisor::new();
        let suggestions = advisor.advise(
            &event(RegressionType::LogicalReads, 150.0, Severity::Medium),
            Some("SELECT * FROM big_table WHERE x = 1"),
        );

        assert_eq!(suggestions[0].suggestion_type, RemediationType::CreateIndex);
        assert_eq!(
            suggestions[0].safety,
            crate::models::SafetyLevel::RequiresReview
        );
    }

    #[test]
    fn test_severe_multi_metric_escalates_only() {
        let advisor = RemediationAdvisor::new();
        let suggestions =
            advisor.advise(&event(RegressionType::MultiMetric, 400.0, Severity::High), None);

        assert_eq!(suggestions.len(), 1);
        assert_eq!(
            suggestions[0].safety,
            crate::models::SafetyLevel::ManualOnly
        );
    }

    #[test]
    fn test_safety_never_upgraded() {
        let advisor = RemediationAdvisor::new();
        for suggestion in advisor.advise(
            &event(RegressionType::Cpu, 250.0, Severity::Medium),
            Some("SELECT 1 FROM t"),
        ) {
            assert_eq!(suggestion.safety, suggestion.suggestion_type.safety());
        }
    }

    #[test]
    fn test_extract_tables() {
        let tables = extract_tables(
            "SELECT * FROM a.b JOIN c ON c.x = b.x WHERE id IN (SELECT id FROM c)",
        );
        assert_eq!(tables, vec!["a.b".to_string(), "c".to_string()]);
    }
}
