//! Error types shared across the monitoring core.
//!
//! Expected operational failures (per-target, per-channel, refusals) are
//! values, not panics: orchestrators isolate them and report them in cycle
//! summaries. Only configuration errors are fatal.

use thiserror::Error;

/// Unified error type for the monitoring core
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not establish a connection to a monitored target.
    #[error("failed to connect to target {target}: {detail}")]
    TargetConnect { target: String, detail: String },

    /// A query against a monitored target failed after connecting.
    #[error("query against target {target} failed: {detail}")]
    TargetQuery { target: String, detail: String },

    /// A per-target operation exceeded its deadline.
    #[error("operation against target {target} timed out after {seconds}s")]
    TargetTimeout { target: String, seconds: u64 },

    /// Local persistence (snapshot/sample/baseline/event/audit store) failed.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// An alert channel failed to deliver.
    #[error("channel '{channel}' send failed: {detail}")]
    ChannelSend { channel: String, detail: String },

    /// A forbidden event lifecycle transition was requested.
    #[error("invalid event transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    /// A remediation script ran and failed.
    #[error("remediation execution failed: {0}")]
    RemediationExec(String),
}

impl MonitorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn target_connect(target: impl Into<String>, detail: impl ToString) -> Self {
        Self::TargetConnect { target: target.into(), detail: detail.to_string() }
    }

    pub fn target_query(target: impl Into<String>, detail: impl ToString) -> Self {
        Self::TargetQuery { target: target.into(), detail: detail.to_string() }
    }

    pub fn channel_send(channel: impl Into<String>, detail: impl ToString) -> Self {
        Self::ChannelSend { channel: channel.into(), detail: detail.to_string() }
    }

    /// True for errors that should be isolated to a single target rather
    /// than aborting the whole cycle.
    pub fn is_target_scoped(&self) -> bool {
        matches!(
            self,
            Self::TargetConnect { .. } | Self::TargetQuery { .. } | Self::TargetTimeout { .. }
        )
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_scoped_classification() {
        assert!(MonitorError::target_connect("prod/sales", "refused").is_target_scoped());
        assert!(!MonitorError::config("missing url").is_target_scoped());
    }
}
