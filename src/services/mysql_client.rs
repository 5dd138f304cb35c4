//! Thin query client over a mysql_async pool.
//!
//! Used by the stats-source adapter to read engine statistics views and by
//! the remediation executor to run approved scripts. Results come back as
//! (column names, string rows); callers do their own typed decoding.

use crate::utils::{MonitorError, MonitorResult};
use mysql_async::{Pool, prelude::Queryable};
use std::sync::Arc;

#[derive(Clone)]
pub struct MysqlClient {
    pool: Arc<Pool>,
    target_key: String,
}

impl MysqlClient {
    pub fn from_pool(pool: Pool, target_key: impl Into<String>) -> Self {
        Self { pool: Arc::new(pool), target_key: target_key.into() }
    }

    /// Execute a query and return results as (column_names, rows).
    pub async fn query_raw(&self, sql: &str) -> MonitorResult<(Vec<String>, Vec<Vec<String>>)> {
        let mut conn = self.pool.get_conn().await.map_err(|e| {
            tracing::error!("Failed to get connection from pool: {}", e);
            MonitorError::target_connect(&self.target_key, e)
        })?;

        let rows: Vec<mysql_async::Row> = conn.query(sql).await.map_err(|e| {
            tracing::error!("Query execution failed on {}: {}", self.target_key, e);
            MonitorError::target_query(&self.target_key, e)
        })?;

        tracing::debug!("Query returned {} rows from {}", rows.len(), self.target_key);
        drop(conn);

        Ok(process_query_result(rows))
    }

    /// Execute a statement and return the affected-row count.
    pub async fn execute(&self, sql: &str) -> MonitorResult<u64> {
        let mut conn = self.pool.get_conn().await.map_err(|e| {
            tracing::error!("Failed to get connection for execute: {}", e);
            MonitorError::target_connect(&self.target_key, e)
        })?;

        conn.query_drop(sql).await.map_err(|e| {
            tracing::error!("Statement execution failed on {}: {}", self.target_key, e);
            MonitorError::target_query(&self.target_key, e)
        })?;

        let affected = conn.affected_rows();
        drop(conn);

        Ok(affected)
    }

    /// Cheap connectivity probe.
    pub async fn ping(&self) -> MonitorResult<()> {
        self.query_raw("SELECT 1").await.map(|_| ())
    }
}

fn process_query_result(rows: Vec<mysql_async::Row>) -> (Vec<String>, Vec<Vec<String>>) {
    if rows.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let col_count = rows[0].columns_ref().len();
    let mut columns = Vec::with_capacity(col_count);
    for col in rows[0].columns_ref().iter() {
        columns.push(col.name_str().to_string());
    }

    let mut result_rows = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let mut row_data = Vec::with_capacity(col_count);
        for col_idx in 0..col_count {
            row_data.push(value_to_string(&row[col_idx]));
        }
        result_rows.push(row_data);
    }

    (columns, result_rows)
}

fn value_to_string(value: &mysql_async::Value) -> String {
    match value {
        mysql_async::Value::NULL => "NULL".to_string(),
        mysql_async::Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).to_string(),
        },
        mysql_async::Value::Int(i) => i.to_string(),
        mysql_async::Value::UInt(u) => u.to_string(),
        mysql_async::Value::Float(f) => f.to_string(),
        mysql_async::Value::Double(d) => d.to_string(),
        mysql_async::Value::Date(year, month, day, hour, minute, second, _micro) => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        ),
        mysql_async::Value::Time(_neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + (*hours as u32);
            format!("{}:{:02}:{:02}", total_hours, minutes, seconds)
        },
    }
}
