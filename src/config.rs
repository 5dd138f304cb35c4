use crate::models::{RankingMetric, RemediationType, Target};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub collection: CollectionConfig,
    pub analysis: AnalysisConfig,
    pub detector: DetectorConfig,
    pub schedule: ScheduleConfig,
    pub alerts: AlertConfig,
    pub remediation: RemediationConfig,
    pub targets: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database URL for local persistence
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/planwatch.db".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,planwatch=debug".to_string(),
            file: Some("logs/planwatch.log".to_string()),
        }
    }
}

/// Global collection defaults; instances and databases may override the
/// cascaded fields (`top_n`, `lookback_minutes`, `timeout_secs`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Number of top-cost queries fetched per target per cycle
    pub top_n: u32,
    /// How far back the stats source should look, in minutes
    pub lookback_minutes: u32,
    /// Queries below this cumulative execution count are skipped at the source
    pub minimum_execution_count: u32,
    /// Per-target collection deadline in seconds
    pub timeout_secs: u64,
    /// Maximum targets collected concurrently
    pub parallelism: usize,
    /// Samples older than this are purged after each cycle
    pub retention_days: i64,
    /// Cost dimension the source orders by
    pub order_by: String,
    pub continue_on_database_error: bool,
    pub continue_on_instance_error: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            top_n: 200,
            lookback_minutes: 60,
            minimum_execution_count: 1,
            timeout_secs: 60,
            parallelism: 4,
            retention_days: 30,
            order_by: "cpu".to_string(),
            continue_on_database_error: true,
            continue_on_instance_error: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Recent window compared against baselines, in minutes
    pub recent_window_minutes: u32,
    /// Lookback for baseline building, in days
    pub baseline_lookback_days: i64,
    /// Minimum samples before a baseline may be built
    pub min_baseline_samples: usize,
    pub hotspot_top_n: usize,
    /// One of: cpu, duration, logical_reads, executions
    pub hotspot_metric: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            recent_window_minutes: 60,
            baseline_lookback_days: 7,
            min_baseline_samples: 10,
            hotspot_top_n: 10,
            hotspot_metric: "cpu".to_string(),
        }
    }
}

/// Regression rule numerics. Percent thresholds express the required
/// relative increase: 50 means current/baseline >= 1.5 triggers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub duration_threshold_percent: f64,
    pub cpu_threshold_percent: f64,
    pub logical_reads_threshold_percent: f64,
    pub minimum_executions: i64,
    pub minimum_baseline_samples: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            duration_threshold_percent: 50.0,
            cpu_threshold_percent: 50.0,
            logical_reads_threshold_percent: 100.0,
            minimum_executions: 5,
            minimum_baseline_samples: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Collection cadence in seconds (accepts "30s", "5m", "1h" in TOML)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub collection_interval_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub analysis_interval_secs: u64,
    /// Hour of day (UTC, 0-23) for the daily baseline rebuild
    pub baseline_rebuild_hour: u32,
    /// Hour of day (UTC, 0-23) for the daily summary
    pub daily_summary_hour: u32,
    /// Soft deadline for any single job run, in seconds
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub job_timeout_secs: u64,
    /// Linear backoff after a failed run, in seconds
    pub failure_backoff_secs: u64,
    /// The daemon stops after this many consecutive failures of one job
    pub max_consecutive_failures: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: 300,
            analysis_interval_secs: 300,
            baseline_rebuild_hour: 2,
            daily_summary_hour: 8,
            job_timeout_secs: 600,
            failure_backoff_secs: 30,
            max_consecutive_failures: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub cooldown_minutes: i64,
    pub max_alerts_per_hour: usize,
    pub webhook: WebhookChannelConfig,
    pub email: EmailChannelConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 15,
            max_alerts_per_hour: 10,
            webhook: WebhookChannelConfig::default(),
            email: EmailChannelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookChannelConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for WebhookChannelConfig {
    fn default() -> Self {
        Self { enabled: false, url: String::new(), timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailChannelConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from: String,
    pub recipients: Vec<String>,
}

impl Default for EmailChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from: String::new(),
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    pub enable_remediation: bool,
    pub allow_production_remediation: bool,
    pub dry_run: bool,
    /// Suggestion types eligible for automatic execution (snake_case names)
    pub auto_execute_types: Vec<String>,
    pub command_timeout_seconds: u64,
    /// Re-running a previously applied suggestion requires this flag
    pub allow_reapply: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enable_remediation: false,
            allow_production_remediation: false,
            dry_run: true,
            auto_execute_types: vec!["update_statistics".to_string()],
            command_timeout_seconds: 60,
            allow_reapply: false,
        }
    }
}

/// One monitored instance plus its databases (instance level of the cascade)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Plain-text password; prefer `password_env` in real deployments
    pub password: String,
    /// Environment variable holding the password, takes precedence
    pub password_env: Option<String>,
    pub enabled: bool,
    pub production: bool,
    pub tags: Vec<String>,
    pub top_n: Option<u32>,
    pub lookback_minutes: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub databases: Vec<DatabaseConfig>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: String::new(),
            port: 3306,
            username: String::new(),
            password: String::new(),
            password_env: None,
            enabled: true,
            production: false,
            tags: Vec::new(),
            top_n: None,
            lookback_minutes: None,
            timeout_secs: None,
            databases: Vec::new(),
        }
    }
}

/// One monitored database (database level of the cascade)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub name: String,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub top_n: Option<u32>,
    pub lookback_minutes: Option<u32>,
    pub timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            tags: Vec::new(),
            top_n: None,
            lookback_minutes: None,
            timeout_secs: None,
        }
    }
}

/// Collection settings resolved through the three-level cascade
/// (global -> instance -> database; nearer overrides farther).
#[derive(Debug, Clone, Copy)]
pub struct EffectiveCollection {
    pub top_n: u32,
    pub lookback_minutes: u32,
    pub timeout_secs: u64,
    pub minimum_execution_count: u32,
}

/// Command-line overrides shared by all subcommands
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<String>,

    /// Storage URL (overrides config file)
    #[arg(long, value_name = "URL", global = true)]
    pub storage_url: Option<String>,

    /// Logging level (overrides config file, e.g. "info,planwatch=debug")
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Collection interval (overrides config file, e.g. "30s", "5m")
    #[arg(long, value_name = "DURATION", global = true)]
    pub collection_interval: Option<String>,

    /// Analysis interval (overrides config file, e.g. "5m", "1h")
    #[arg(long, value_name = "DURATION", global = true)]
    pub analysis_interval: Option<String>,

    /// Collection parallelism bound (overrides config file)
    #[arg(long, value_name = "N", global = true)]
    pub parallelism: Option<usize>,
}

impl Config {
    /// Load configuration with file, environment and command-line support.
    ///
    /// Priority (highest last applied):
    /// 1. Default values
    /// 2. Configuration file (config.toml)
    /// 3. Environment variables (prefixed with APP_)
    /// 4. Command line arguments
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, anyhow::Error> {
        let config_path = overrides.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables:
    /// - APP_STORAGE_URL: local storage URL
    /// - APP_LOG_LEVEL: logging level
    /// - APP_COLLECTION_INTERVAL: collection cadence ("30s", "5m", "1h")
    /// - APP_ANALYSIS_INTERVAL: analysis cadence
    /// - APP_PARALLELISM: collection parallelism bound
    /// - APP_WEBHOOK_URL: webhook channel endpoint
    /// - APP_SMTP_PASSWORD: SMTP credential for the email channel
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("APP_STORAGE_URL") {
            self.storage.url = url;
            tracing::info!("Override storage.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(interval) = std::env::var("APP_COLLECTION_INTERVAL") {
            match parse_duration_to_secs(&interval) {
                Ok(val) => {
                    self.schedule.collection_interval_secs = val;
                    tracing::info!("Override schedule.collection_interval_secs from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_COLLECTION_INTERVAL '{}': {} (keep {})",
                    interval,
                    e,
                    self.schedule.collection_interval_secs
                ),
            }
        }

        if let Ok(interval) = std::env::var("APP_ANALYSIS_INTERVAL") {
            match parse_duration_to_secs(&interval) {
                Ok(val) => {
                    self.schedule.analysis_interval_secs = val;
                    tracing::info!("Override schedule.analysis_interval_secs from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_ANALYSIS_INTERVAL '{}': {} (keep {})",
                    interval,
                    e,
                    self.schedule.analysis_interval_secs
                ),
            }
        }

        if let Ok(parallelism) = std::env::var("APP_PARALLELISM")
            && let Ok(val) = parallelism.parse()
        {
            self.collection.parallelism = val;
            tracing::info!("Override collection.parallelism from env: {}", val);
        }

        if let Ok(url) = std::env::var("APP_WEBHOOK_URL") {
            self.alerts.webhook.url = url;
            tracing::info!("Override alerts.webhook.url from env");
        }

        if let Ok(password) = std::env::var("APP_SMTP_PASSWORD") {
            self.alerts.email.smtp_password = password;
            tracing::info!("Override alerts.email.smtp_password from env");
        }
    }

    fn apply_cli_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.storage_url {
            self.storage.url = url.clone();
            tracing::info!("Override storage.url from CLI");
        }

        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(interval) = &overrides.collection_interval {
            match parse_duration_to_secs(interval) {
                Ok(val) => {
                    self.schedule.collection_interval_secs = val;
                    tracing::info!("Override schedule.collection_interval_secs from CLI: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid --collection-interval '{}': {} (keep {})",
                    interval,
                    e,
                    self.schedule.collection_interval_secs
                ),
            }
        }

        if let Some(interval) = &overrides.analysis_interval {
            match parse_duration_to_secs(interval) {
                Ok(val) => {
                    self.schedule.analysis_interval_secs = val;
                    tracing::info!("Override schedule.analysis_interval_secs from CLI: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid --analysis-interval '{}': {} (keep {})",
                    interval,
                    e,
                    self.schedule.analysis_interval_secs
                ),
            }
        }

        if let Some(parallelism) = overrides.parallelism {
            self.collection.parallelism = parallelism;
            tracing::info!("Override collection.parallelism from CLI: {}", parallelism);
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.storage.url.is_empty() {
            anyhow::bail!("storage.url cannot be empty");
        }
        if self.collection.parallelism == 0 {
            anyhow::bail!("collection.parallelism must be > 0");
        }
        if self.collection.top_n == 0 {
            anyhow::bail!("collection.top_n must be > 0");
        }
        if self.collection.retention_days <= 0 {
            anyhow::bail!("collection.retention_days must be > 0");
        }
        if self.schedule.collection_interval_secs == 0 {
            anyhow::bail!("schedule.collection_interval_secs must be > 0");
        }
        if self.schedule.analysis_interval_secs == 0 {
            anyhow::bail!("schedule.analysis_interval_secs must be > 0");
        }
        if self.schedule.baseline_rebuild_hour > 23 {
            anyhow::bail!("schedule.baseline_rebuild_hour must be 0-23");
        }
        if self.schedule.daily_summary_hour > 23 {
            anyhow::bail!("schedule.daily_summary_hour must be 0-23");
        }
        if self.detector.duration_threshold_percent <= 0.0
            || self.detector.cpu_threshold_percent <= 0.0
            || self.detector.logical_reads_threshold_percent <= 0.0
        {
            anyhow::bail!("detector thresholds must be > 0");
        }
        if RankingMetric::parse(&self.analysis.hotspot_metric).is_none() {
            anyhow::bail!(
                "analysis.hotspot_metric must be one of cpu, duration, logical_reads, executions"
            );
        }
        for ty in &self.remediation.auto_execute_types {
            if RemediationType::parse(ty).is_none() {
                anyhow::bail!("remediation.auto_execute_types contains unknown type '{}'", ty);
            }
        }
        if self.alerts.webhook.enabled && self.alerts.webhook.url.is_empty() {
            anyhow::bail!("alerts.webhook.enabled requires alerts.webhook.url");
        }
        if self.alerts.email.enabled {
            if self.alerts.email.smtp_host.is_empty() {
                anyhow::bail!("alerts.email.enabled requires alerts.email.smtp_host");
            }
            if self.alerts.email.recipients.is_empty() {
                anyhow::bail!("alerts.email.enabled requires at least one recipient");
            }
        }
        for instance in &self.targets {
            if instance.name.is_empty() {
                anyhow::bail!("every [[targets]] entry needs a name");
            }
            if instance.host.is_empty() {
                anyhow::bail!("target '{}' needs a host", instance.name);
            }
            for db in &instance.databases {
                if db.name.is_empty() {
                    anyhow::bail!("target '{}' has a database without a name", instance.name);
                }
            }
        }
        Ok(())
    }

    /// Expand the instance/database tree into the flat enabled-target list.
    /// Snapshotted once per cycle; never re-read mid-cycle.
    pub fn enabled_targets(&self) -> Vec<Target> {
        let mut out = Vec::new();
        for instance in &self.targets {
            if !instance.enabled {
                continue;
            }
            for db in &instance.databases {
                if !db.enabled {
                    continue;
                }
                let mut tags = instance.tags.clone();
                tags.extend(db.tags.iter().cloned());
                out.push(Target {
                    instance_name: instance.name.clone(),
                    database_name: db.name.clone(),
                    enabled: true,
                    tags,
                    is_production: instance.production,
                });
            }
        }
        out
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.targets.iter().find(|i| i.name == name)
    }

    /// Resolve the collection cascade for one target.
    pub fn effective_collection(&self, instance: &str, database: &str) -> EffectiveCollection {
        let inst = self.instance(instance);
        let db = inst.and_then(|i| i.databases.iter().find(|d| d.name == database));

        EffectiveCollection {
            top_n: db
                .and_then(|d| d.top_n)
                .or(inst.and_then(|i| i.top_n))
                .unwrap_or(self.collection.top_n),
            lookback_minutes: db
                .and_then(|d| d.lookback_minutes)
                .or(inst.and_then(|i| i.lookback_minutes))
                .unwrap_or(self.collection.lookback_minutes),
            timeout_secs: db
                .and_then(|d| d.timeout_secs)
                .or(inst.and_then(|i| i.timeout_secs))
                .unwrap_or(self.collection.timeout_secs),
            minimum_execution_count: self.collection.minimum_execution_count,
        }
    }

    /// Auto-execute allow-list parsed to typed values.
    pub fn auto_execute_types(&self) -> Vec<RemediationType> {
        self.remediation
            .auto_execute_types
            .iter()
            .filter_map(|s| RemediationType::parse(s))
            .collect()
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Custom serde deserializer to support numeric or human-friendly string values
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_overrides() -> Config {
        let toml_text = r#"
            [collection]
            top_n = 100
            lookback_minutes = 60
            timeout_secs = 45

            [[targets]]
            name = "prod-01"
            host = "db01.internal"
            username = "monitor"
            top_n = 50

            [[targets.databases]]
            name = "sales"
            top_n = 25
            timeout_secs = 10

            [[targets.databases]]
            name = "crm"
        "#;
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_cascade_database_wins() {
        let config = config_with_overrides();
        let eff = config.effective_collection("prod-01", "sales");
        assert_eq!(eff.top_n, 25);
        assert_eq!(eff.timeout_secs, 10);
        // Not set anywhere below global
        assert_eq!(eff.lookback_minutes, 60);
    }

    #[test]
    fn test_cascade_instance_then_global() {
        let config = config_with_overrides();
        let eff = config.effective_collection("prod-01", "crm");
        assert_eq!(eff.top_n, 50); // instance override
        assert_eq!(eff.timeout_secs, 45); // global

        let eff = config.effective_collection("unknown", "db");
        assert_eq!(eff.top_n, 100); // global only
    }

    #[test]
    fn test_enabled_targets_expansion() {
        let mut config = config_with_overrides();
        assert_eq!(config.enabled_targets().len(), 2);

        config.targets[0].databases[1].enabled = false;
        assert_eq!(config.enabled_targets().len(), 1);

        config.targets[0].enabled = false;
        assert!(config.enabled_targets().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_hotspot_metric() {
        let mut config = Config::default();
        config.analysis.hotspot_metric = "wait_time".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_auto_execute_type() {
        let mut config = Config::default();
        config.remediation.auto_execute_types = vec!["reboot_server".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(parse_duration_to_secs("30").unwrap(), 30);
        assert_eq!(parse_duration_to_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_to_secs("1h").unwrap(), 3600);
        assert!(parse_duration_to_secs("abc").is_err());
    }
}
