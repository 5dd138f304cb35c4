//! Regression event repository.
//!
//! The event lifecycle (new -> acknowledged -> resolved, with dismiss from
//! new) is enforced here, at the repo boundary: an invalid transition is a
//! loud error, not a silent overwrite.

use crate::models::{EventStatus, EventSummary, RegressionEvent, RegressionType, Severity};
use crate::utils::{MonitorError, MonitorResult};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct EventRepo {
    pool: SqlitePool,
}

impl EventRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, event: &RegressionEvent) -> MonitorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events
                (id, fingerprint_id, instance_name, database_name, detected_at_utc,
                 regression_type, metric_name, baseline_value, current_value, change_percent,
                 severity, is_plan_change, baseline_plan_hash, current_plan_hash, status,
                 acknowledged_by, acknowledged_at_utc, resolved_by, resolved_at_utc, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(event.fingerprint_id)
        .bind(&event.instance_name)
        .bind(&event.database_name)
        .bind(event.detected_at_utc)
        .bind(event.regression_type.as_str())
        .bind(&event.metric_name)
        .bind(event.baseline_value)
        .bind(event.current_value)
        .bind(event.change_percent)
        .bind(event.severity.as_str())
        .bind(event.is_plan_change)
        .bind(&event.baseline_plan_hash)
        .bind(&event.current_plan_hash)
        .bind(event.status.as_str())
        .bind(&event.acknowledged_by)
        .bind(event.acknowledged_at_utc)
        .bind(&event.resolved_by)
        .bind(event.resolved_at_utc)
        .bind(&event.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> MonitorResult<Option<RegressionEvent>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| map_event(&r)))
    }

    /// Open (new or acknowledged) events for a fingerprint, used for
    /// deduplication before persisting a new detection.
    pub async fn get_active_by_fingerprint(
        &self,
        fingerprint_id: i64,
    ) -> MonitorResult<Vec<RegressionEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE fingerprint_id = ? AND status IN ('new', 'acknowledged')
            ORDER BY detected_at_utc DESC
            "#,
        )
        .bind(fingerprint_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_event).collect())
    }

    /// Raise an open event's observed value and severity after a re-detection
    /// with worse numbers. Never lowers severity.
    pub async fn escalate(
        &self,
        id: &str,
        current_value: f64,
        change_percent: f64,
        severity: Severity,
    ) -> MonitorResult<()> {
        sqlx::query(
            r#"
            UPDATE events SET current_value = ?, change_percent = ?, severity = ?
            WHERE id = ? AND status IN ('new', 'acknowledged')
            "#,
        )
        .bind(current_value)
        .bind(change_percent)
        .bind(severity.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn acknowledge(
        &self,
        id: &str,
        by: &str,
        notes: Option<&str>,
    ) -> MonitorResult<()> {
        self.transition(id, EventStatus::Acknowledged, by, notes).await
    }

    pub async fn resolve(&self, id: &str, by: &str, notes: Option<&str>) -> MonitorResult<()> {
        self.transition(id, EventStatus::Resolved, by, notes).await
    }

    pub async fn dismiss(&self, id: &str, by: &str, notes: Option<&str>) -> MonitorResult<()> {
        self.transition(id, EventStatus::Dismissed, by, notes).await
    }

    async fn transition(
        &self,
        id: &str,
        next: EventStatus,
        by: &str,
        notes: Option<&str>,
    ) -> MonitorResult<()> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| sqlx::Error::RowNotFound)?;

        if !current.status.can_transition_to(next) {
            return Err(MonitorError::InvalidTransition {
                from: current.status.as_str(),
                to: next.as_str(),
            });
        }

        let now = Utc::now();
        match next {
            EventStatus::Acknowledged => {
                sqlx::query(
                    r#"
                    UPDATE events
                    SET status = 'acknowledged', acknowledged_by = ?, acknowledged_at_utc = ?,
                        notes = COALESCE(?, notes)
                    WHERE id = ?
                    "#,
                )
                .bind(by)
                .bind(now)
                .bind(notes)
                .bind(id)
                .execute(&self.pool)
                .await?;
            },
            EventStatus::Resolved => {
                sqlx::query(
                    r#"
                    UPDATE events
                    SET status = 'resolved', resolved_by = ?, resolved_at_utc = ?,
                        notes = COALESCE(?, notes)
                    WHERE id = ?
                    "#,
                )
                .bind(by)
                .bind(now)
                .bind(notes)
                .bind(id)
                .execute(&self.pool)
                .await?;
            },
            EventStatus::Dismissed => {
                sqlx::query(
                    r#"
                    UPDATE events
                    SET status = 'dismissed', resolved_by = ?, resolved_at_utc = ?,
                        notes = COALESCE(?, notes)
                    WHERE id = ?
                    "#,
                )
                .bind(by)
                .bind(now)
                .bind(notes)
                .bind(id)
                .execute(&self.pool)
                .await?;
            },
            EventStatus::New => unreachable!("new is never a transition destination"),
        }

        Ok(())
    }

    /// Aggregate counts over a window for the daily summary.
    pub async fn summary(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<EventSummary> {
        let rows = sqlx::query(
            r#"
            SELECT severity, regression_type, status, is_plan_change
            FROM events
            WHERE detected_at_utc >= ? AND detected_at_utc < ?
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = EventSummary {
            window_start_utc: Some(from),
            window_end_utc: Some(to),
            ..Default::default()
        };

        for row in &rows {
            summary.total_events += 1;
            let severity: String = row.get("severity");
            match Severity::parse(&severity) {
                Some(Severity::Critical) => summary.critical += 1,
                Some(Severity::High) => summary.high += 1,
                Some(Severity::Medium) => summary.medium += 1,
                _ => summary.low += 1,
            }
            let status: String = row.get("status");
            match EventStatus::parse(&status) {
                Some(EventStatus::New) => summary.new_events += 1,
                Some(EventStatus::Resolved) => summary.resolved += 1,
                _ => {},
            }
            if row.get::<bool, _>("is_plan_change") {
                summary.plan_changes += 1;
            }
        }

        Ok(summary)
    }
}

fn map_event(row: &sqlx::sqlite::SqliteRow) -> RegressionEvent {
    let regression_type: String = row.get("regression_type");
    let severity: String = row.get("severity");
    let status: String = row.get("status");

    RegressionEvent {
        id: row.get("id"),
        fingerprint_id: row.get("fingerprint_id"),
        instance_name: row.get("instance_name"),
        database_name: row.get("database_name"),
        detected_at_utc: row.get("detected_at_utc"),
        regression_type: RegressionType::parse(&regression_type)
            .unwrap_or(RegressionType::Duration),
        metric_name: row.get("metric_name"),
        baseline_value: row.get("baseline_value"),
        current_value: row.get("current_value"),
        change_percent: row.get("change_percent"),
        severity: Severity::parse(&severity).unwrap_or(Severity::Low),
        is_plan_change: row.get("is_plan_change"),
        baseline_plan_hash: row.get("baseline_plan_hash"),
        current_plan_hash: row.get("current_plan_hash"),
        status: EventStatus::parse(&status).unwrap_or(EventStatus::New),
        acknowledged_by: row.get("acknowledged_by"),
        acknowledged_at_utc: row.get("acknowledged_at_utc"),
        resolved_by: row.get("resolved_by"),
        resolved_at_utc: row.get("resolved_at_utc"),
        notes: row.get("notes"),
    }
}
