use clap::{Parser, Subcommand};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planwatch::config::{Config, ConfigOverrides};
use planwatch::models::{
    DailySummary, RegressionEvent, RemediationOutcome, SafetyLevel, Target, TargetSelector,
};
use planwatch::utils::{ExecutorExit, Schedule, ScheduledExecutor, ScheduledTask};
use planwatch::AppState;

#[derive(Parser, Debug)]
#[command(name = "planwatch")]
#[command(version, about = "Query plan and performance regression monitor")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon with all scheduled jobs
    Run,
    /// Run a single collection cycle and exit
    CollectOnce {
        /// Restrict to one instance
        #[arg(long)]
        instance: Option<String>,
        /// Restrict to one database
        #[arg(long)]
        database: Option<String>,
    },
    /// Run a single analysis cycle and exit
    AnalyzeOnce {
        #[arg(long)]
        instance: Option<String>,
        #[arg(long)]
        database: Option<String>,
        /// Recent window in minutes (defaults to configuration)
        #[arg(long, value_name = "MINUTES")]
        window: Option<u32>,
    },
    /// Rebuild baselines from historical samples and exit
    RebuildBaselines {
        #[arg(long)]
        instance: Option<String>,
        #[arg(long)]
        database: Option<String>,
        /// Lookback in days (defaults to configuration)
        #[arg(long, value_name = "DAYS")]
        lookback: Option<i64>,
    },
    /// Probe all enabled alert channels and target connections
    TestChannels,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::load(&cli.overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        },
    };

    let _log_guard = init_tracing(&config.logging);
    tracing::info!("planwatch starting up");

    let state = match AppState::build(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("startup failed: {}", e);
            std::process::exit(1);
        },
    };

    let exit_code = match cli.command {
        Command::Run => run_daemon(state).await,
        Command::CollectOnce { instance, database } => {
            collect_once(state, TargetSelector { instance, database }).await
        },
        Command::AnalyzeOnce { instance, database, window } => {
            analyze_once(state, TargetSelector { instance, database }, window).await
        },
        Command::RebuildBaselines { instance, database, lookback } => {
            rebuild_baselines(state, TargetSelector { instance, database }, lookback).await
        },
        Command::TestChannels => test_channels(state).await,
    };

    std::process::exit(exit_code);
}

/// Stdout plus optional daily-rolling file logging, filtered by the
/// configured level.
fn init_tracing(
    logging: &planwatch::config::LoggingConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(file) = &logging.file {
        let log_path = std::path::Path::new(file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("planwatch.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        Some(guard)
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    }
}

// ============================================================================
// Daemon mode
// ============================================================================

async fn run_daemon(state: AppState) -> i32 {
    let state = Arc::new(state);
    let shutdown = Arc::new(AtomicBool::new(false));
    let schedule = state.config.schedule.clone();

    let mut jobs = tokio::task::JoinSet::new();

    spawn_job(
        &mut jobs,
        "collection",
        Schedule::Every(StdDuration::from_secs(schedule.collection_interval_secs)),
        &schedule,
        Arc::clone(&shutdown),
        CollectionJob { state: Arc::clone(&state), shutdown: Arc::clone(&shutdown) },
    );
    spawn_job(
        &mut jobs,
        "analysis",
        Schedule::Every(StdDuration::from_secs(schedule.analysis_interval_secs)),
        &schedule,
        Arc::clone(&shutdown),
        AnalysisJob { state: Arc::clone(&state), shutdown: Arc::clone(&shutdown) },
    );
    spawn_job(
        &mut jobs,
        "baseline-rebuild",
        Schedule::DailyAt { hour: schedule.baseline_rebuild_hour, minute: 0 },
        &schedule,
        Arc::clone(&shutdown),
        BaselineRebuildJob { state: Arc::clone(&state), shutdown: Arc::clone(&shutdown) },
    );
    spawn_job(
        &mut jobs,
        "daily-summary",
        Schedule::DailyAt { hour: schedule.daily_summary_hour, minute: 0 },
        &schedule,
        Arc::clone(&shutdown),
        DailySummaryJob { state: Arc::clone(&state), shutdown: Arc::clone(&shutdown) },
    );

    tracing::info!("planwatch daemon running; press Ctrl-C to stop");

    let mut exit_code = 0;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        },
        Some(Ok((name, exit))) = jobs.join_next() => {
            if exit == ExecutorExit::FailureLimit {
                tracing::error!("job '{}' exceeded its failure limit, stopping daemon", name);
                exit_code = 2;
            } else {
                tracing::info!("job '{}' stopped", name);
            }
        },
    }

    shutdown.store(true, Ordering::Relaxed);
    while let Some(joined) = jobs.join_next().await {
        if let Ok((name, ExecutorExit::FailureLimit)) = joined {
            tracing::error!("job '{}' exceeded its failure limit during shutdown", name);
            exit_code = 2;
        }
    }

    tracing::info!("planwatch stopped");
    exit_code
}

fn spawn_job<T: ScheduledTask>(
    jobs: &mut tokio::task::JoinSet<(&'static str, ExecutorExit)>,
    name: &'static str,
    when: Schedule,
    schedule: &planwatch::config::ScheduleConfig,
    shutdown: Arc<AtomicBool>,
    task: T,
) {
    let executor = ScheduledExecutor::new(name, when, shutdown)
        .with_job_timeout(StdDuration::from_secs(schedule.job_timeout_secs))
        .with_failure_policy(
            StdDuration::from_secs(schedule.failure_backoff_secs),
            schedule.max_consecutive_failures,
        );
    jobs.spawn(async move { (name, executor.start(task).await) });
}

// ============================================================================
// Scheduled jobs
// ============================================================================

struct CollectionJob {
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
}

impl ScheduledTask for CollectionJob {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let targets = self.state.config.enabled_targets();
            let summary = self
                .state
                .collection
                .run_cycle(&self.state.config, targets, Arc::clone(&self.shutdown))
                .await;
            if !summary.is_full_success() {
                tracing::warn!(
                    failed = summary.targets_failed,
                    total = summary.targets_total,
                    "collection cycle had per-target failures"
                );
            }
            Ok(())
        })
    }

    fn should_terminate(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct AnalysisJob {
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
}

impl ScheduledTask for AnalysisJob {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let targets = self.state.config.enabled_targets();
            let window =
                chrono::Duration::minutes(self.state.config.analysis.recent_window_minutes as i64);
            let output = self
                .state
                .analysis
                .run_cycle(&targets, window, Arc::clone(&self.shutdown))
                .await;

            self.state.gateway.dispatch_regressions(&output.new_events).await;
            self.state.gateway.dispatch_hotspots(&output.hotspots).await;

            if self.state.config.remediation.enable_remediation {
                auto_remediate(&self.state, &targets, &output.new_events, "scheduler").await;
            }
            Ok(())
        })
    }

    fn should_terminate(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct BaselineRebuildJob {
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
}

impl ScheduledTask for BaselineRebuildJob {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let lookback =
                chrono::Duration::days(self.state.config.analysis.baseline_lookback_days);
            self.state
                .analysis
                .rebuild_all_baselines(lookback, Arc::clone(&self.shutdown))
                .await?;
            Ok(())
        })
    }

    fn should_terminate(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct DailySummaryJob {
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
}

impl ScheduledTask for DailySummaryJob {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let summary = build_daily_summary(&self.state).await?;
            self.state.gateway.dispatch_daily_summary(&summary).await;
            Ok(())
        })
    }

    fn should_terminate(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

async fn build_daily_summary(state: &AppState) -> Result<DailySummary, anyhow::Error> {
    let now = chrono::Utc::now();
    let targets = state.config.enabled_targets();
    let events = state.events.summary(now - chrono::Duration::hours(24), now).await?;
    let mut hotspots = state
        .analysis
        .window_hotspots(&targets, chrono::Duration::hours(24))
        .await?;
    hotspots.truncate(state.config.analysis.hotspot_top_n);

    Ok(DailySummary {
        generated_at_utc: now,
        events,
        top_hotspots: hotspots,
        targets_monitored: targets.len(),
    })
}

// ============================================================================
// Auto-remediation driver
// ============================================================================

#[derive(Debug, Default)]
struct RemediationStats {
    executed: usize,
    dry_runs: usize,
    refused: usize,
    failed: usize,
}

/// For each fresh event, take the advisor's best safe suggestion and hand it
/// to the executor. The executor's gates decide everything else.
async fn auto_remediate(
    state: &AppState,
    targets: &[Target],
    events: &[RegressionEvent],
    initiated_by: &str,
) -> RemediationStats {
    let mut stats = RemediationStats::default();

    for event in events {
        let Some(target) = targets.iter().find(|t| {
            t.instance_name == event.instance_name && t.database_name == event.database_name
        }) else {
            continue;
        };

        let sample_sql = match state.fingerprints.get(event.fingerprint_id).await {
            Ok(Some(fingerprint)) => Some(fingerprint.sample_text),
            _ => None,
        };

        let suggestions = state.advisor.advise(event, sample_sql.as_deref());
        let Some(suggestion) = suggestions.iter().find(|s| s.safety == SafetyLevel::Safe) else {
            continue;
        };

        match state
            .remediation
            .execute(target, event.fingerprint_id, suggestion, initiated_by, false)
            .await
        {
            Ok(RemediationOutcome::Executed { .. }) => stats.executed += 1,
            Ok(RemediationOutcome::DryRun) => stats.dry_runs += 1,
            Ok(RemediationOutcome::Refused(_)) => stats.refused += 1,
            Ok(RemediationOutcome::Failed { .. }) => stats.failed += 1,
            Err(e) => {
                tracing::error!("remediation audit write failed: {}", e);
                stats.failed += 1;
            },
        }
    }

    if stats.executed + stats.dry_runs + stats.refused + stats.failed > 0 {
        tracing::info!(
            executed = stats.executed,
            dry_runs = stats.dry_runs,
            refused = stats.refused,
            failed = stats.failed,
            "auto-remediation pass finished"
        );
    }
    stats
}

// ============================================================================
// One-shot commands
// ============================================================================

fn selected_targets(state: &AppState, selector: &TargetSelector) -> Vec<Target> {
    state
        .config
        .enabled_targets()
        .into_iter()
        .filter(|t| selector.matches(t))
        .collect()
}

async fn collect_once(state: AppState, selector: TargetSelector) -> i32 {
    let targets = selected_targets(&state, &selector);
    if targets.is_empty() {
        tracing::error!("no enabled targets match the selector");
        return 1;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let summary = state
        .collection
        .run_cycle(&state.config, targets, shutdown)
        .await;

    if summary.is_full_success() { 0 } else { 2 }
}

async fn analyze_once(state: AppState, selector: TargetSelector, window: Option<u32>) -> i32 {
    let targets = selected_targets(&state, &selector);
    if targets.is_empty() {
        tracing::error!("no enabled targets match the selector");
        return 1;
    }

    let window_minutes = window.unwrap_or(state.config.analysis.recent_window_minutes);
    let shutdown = Arc::new(AtomicBool::new(false));
    let output = state
        .analysis
        .run_cycle(&targets, chrono::Duration::minutes(window_minutes as i64), shutdown)
        .await;

    state.gateway.dispatch_regressions(&output.new_events).await;
    state.gateway.dispatch_hotspots(&output.hotspots).await;

    let mut stats = RemediationStats::default();
    if state.config.remediation.enable_remediation {
        stats = auto_remediate(&state, &targets, &output.new_events, "analyze-once").await;
    }

    if !output.summary.is_full_success() {
        2
    } else if stats.refused > 0 && stats.executed == 0 && stats.dry_runs == 0 {
        3
    } else {
        0
    }
}

async fn rebuild_baselines(
    state: AppState,
    selector: TargetSelector,
    lookback: Option<i64>,
) -> i32 {
    let lookback_days = lookback.unwrap_or(state.config.analysis.baseline_lookback_days);
    if lookback_days <= 0 {
        tracing::error!("lookback must be positive");
        return 1;
    }
    let lookback = chrono::Duration::days(lookback_days);
    let shutdown = Arc::new(AtomicBool::new(false));

    let selector_given = selector.instance.is_some() || selector.database.is_some();
    let outcome = if selector_given {
        let targets = selected_targets(&state, &selector);
        if targets.is_empty() {
            tracing::error!("no enabled targets match the selector");
            return 1;
        }
        state.analysis.rebuild_for_targets(&targets, lookback, shutdown).await
    } else {
        state.analysis.rebuild_all_baselines(lookback, shutdown).await
    };

    match outcome {
        Ok(result) if result.failed == 0 => 0,
        Ok(_) => 2,
        Err(e) => {
            tracing::error!("baseline rebuild failed: {}", e);
            2
        },
    }
}

async fn test_channels(state: AppState) -> i32 {
    let mut all_ok = true;

    for (name, result) in state.gateway.test_all().await {
        match result {
            Ok(()) => tracing::info!("channel '{}' ok", name),
            Err(e) => {
                all_ok = false;
                tracing::error!("channel '{}' failed: {}", name, e);
            },
        }
    }

    for target in state.config.enabled_targets() {
        match state.pool_manager.client(&target) {
            Ok(client) => match client.ping().await {
                Ok(()) => tracing::info!("target {} reachable", target),
                Err(e) => {
                    all_ok = false;
                    tracing::error!("target {} unreachable: {}", target, e);
                },
            },
            Err(e) => {
                all_ok = false;
                tracing::error!("target {} misconfigured: {}", target, e);
            },
        }
    }

    if all_ok { 0 } else { 2 }
}
