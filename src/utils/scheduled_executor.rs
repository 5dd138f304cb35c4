// Scheduled Executor for periodic tasks
// Adapted for async/tokio runtime

use chrono::{Timelike, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// A trait for tasks that run periodically
pub trait ScheduledTask: Send + Sync + 'static {
    /// Execute the task
    /// Returns Ok(()) on success, Err on failure
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;

    /// Check if the task should terminate
    /// Default: never terminate (run forever)
    fn should_terminate(&self) -> bool {
        false
    }
}

/// Blanket implementation for Arc<T> where T: ScheduledTask
/// This allows passing Arc-wrapped tasks directly to the executor
impl<T: ScheduledTask> ScheduledTask for Arc<T> {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        (**self).run()
    }

    fn should_terminate(&self) -> bool {
        (**self).should_terminate()
    }
}

/// When a task fires
#[derive(Debug, Clone, Copy)]
pub enum Schedule {
    /// Fixed interval between run completions
    Every(Duration),
    /// Once per day at the given UTC hour
    DailyAt { hour: u32, minute: u32 },
}

impl Schedule {
    /// Milliseconds from now until the next firing.
    fn next_delay_ms(&self) -> i64 {
        match self {
            Schedule::Every(interval) => interval.as_millis() as i64,
            Schedule::DailyAt { hour, minute } => {
                let now = Utc::now();
                let today_fire = now
                    .with_hour(*hour)
                    .and_then(|t| t.with_minute(*minute))
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(now);
                let fire = if today_fire > now {
                    today_fire
                } else {
                    today_fire + chrono::Duration::days(1)
                };
                (fire - now).num_milliseconds().max(0)
            },
        }
    }
}

/// Why a scheduled task loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorExit {
    /// Shutdown was requested (flag or should_terminate)
    Shutdown,
    /// The task failed too many times in a row
    FailureLimit,
}

/// Scheduled executor for running periodic tasks
///
/// Runs are awaited inline, so a tick that arrives while the previous run is
/// still in flight is absorbed rather than overlapped: the next firing is
/// computed from the completion time.
pub struct ScheduledExecutor {
    schedule: Schedule,
    task_name: String,
    shutdown: Arc<AtomicBool>,
    /// Soft deadline per run; a run past it is abandoned and counted failed
    job_timeout: Duration,
    /// Linear backoff added after each failed run
    failure_backoff: Duration,
    /// Consecutive failures that end the loop
    max_consecutive_failures: u32,
}

impl ScheduledExecutor {
    pub fn new(task_name: impl Into<String>, schedule: Schedule, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            task_name: task_name.into(),
            schedule,
            shutdown,
            job_timeout: Duration::from_secs(600),
            failure_backoff: Duration::from_secs(30),
            max_consecutive_failures: 10,
        }
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_failure_policy(
        mut self,
        failure_backoff: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        self.failure_backoff = failure_backoff;
        self.max_consecutive_failures = max_consecutive_failures;
        self
    }

    /// Start the scheduled task loop. Returns why it stopped.
    pub async fn start<T>(self, task: T) -> ExecutorExit
    where
        T: ScheduledTask,
    {
        let task_name = self.task_name.clone();
        let shutdown = self.shutdown;

        tracing::info!(
            "Starting scheduled task '{}' with schedule: {:?}",
            task_name,
            self.schedule
        );

        let mut next_execution = Utc::now().timestamp_millis() + self.schedule.next_delay_ms();
        let mut consecutive_failures: u32 = 0;

        loop {
            if shutdown.load(Ordering::Relaxed) || task.should_terminate() {
                tracing::info!("Scheduled task '{}' is shutting down", task_name);
                return ExecutorExit::Shutdown;
            }

            let now = Utc::now().timestamp_millis();

            if now >= next_execution {
                tracing::debug!("Executing scheduled task '{}'", task_name);

                let run_result = tokio::time::timeout(self.job_timeout, task.run()).await;
                let failed = match run_result {
                    Ok(Ok(())) => {
                        tracing::debug!("Scheduled task '{}' completed successfully", task_name);
                        consecutive_failures = 0;
                        false
                    },
                    Ok(Err(e)) => {
                        tracing::error!("Scheduled task '{}' failed: {}", task_name, e);
                        true
                    },
                    Err(_) => {
                        tracing::error!(
                            "Scheduled task '{}' exceeded its deadline of {:?}",
                            task_name,
                            self.job_timeout
                        );
                        true
                    },
                };

                if failed {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.max_consecutive_failures {
                        tracing::error!(
                            "Scheduled task '{}' failed {} times in a row, giving up",
                            task_name,
                            consecutive_failures
                        );
                        return ExecutorExit::FailureLimit;
                    }
                    sleep(self.failure_backoff).await;
                }

                next_execution = Utc::now().timestamp_millis() + self.schedule.next_delay_ms();
            }

            let wait_ms = next_execution.saturating_sub(Utc::now().timestamp_millis());
            if wait_ms > 0 {
                // Wake periodically so shutdown is noticed promptly
                sleep(Duration::from_millis((wait_ms as u64).min(1000))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct TestTask {
        counter: Arc<AtomicU32>,
        max_runs: u32,
        fail_always: bool,
    }

    impl ScheduledTask for TestTask {
        fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
            Box::pin(async move {
                let count = self.counter.fetch_add(1, Ordering::Relaxed);
                tracing::info!("TestTask run #{}", count + 1);
                if self.fail_always {
                    anyhow::bail!("always fails");
                }
                Ok(())
            })
        }

        fn should_terminate(&self) -> bool {
            !self.fail_always && self.counter.load(Ordering::Relaxed) >= self.max_runs
        }
    }

    #[tokio::test]
    async fn test_scheduled_executor_runs_until_terminate() {
        let counter = Arc::new(AtomicU32::new(0));
        let task = TestTask { counter: counter.clone(), max_runs: 3, fail_always: false };

        let executor = ScheduledExecutor::new(
            "test",
            Schedule::Every(Duration::from_millis(50)),
            Arc::new(AtomicBool::new(false)),
        );
        let exit = executor.start(task).await;

        assert_eq!(exit, ExecutorExit::Shutdown);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_failure_limit_ends_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let task = TestTask { counter: counter.clone(), max_runs: 0, fail_always: true };

        let executor = ScheduledExecutor::new(
            "failing",
            Schedule::Every(Duration::from_millis(10)),
            Arc::new(AtomicBool::new(false)),
        )
        .with_failure_policy(Duration::from_millis(1), 3);
        let exit = executor.start(task).await;

        assert_eq!(exit, ExecutorExit::FailureLimit);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_loop() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let counter = Arc::new(AtomicU32::new(0));
        let task = TestTask { counter: counter.clone(), max_runs: 100, fail_always: false };

        let executor = ScheduledExecutor::new(
            "stopped",
            Schedule::Every(Duration::from_millis(10)),
            shutdown,
        );
        let exit = executor.start(task).await;

        assert_eq!(exit, ExecutorExit::Shutdown);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_daily_schedule_delay_is_bounded() {
        let schedule = Schedule::DailyAt { hour: 2, minute: 0 };
        let delay = schedule.next_delay_ms();
        assert!(delay >= 0);
        assert!(delay <= 24 * 3600 * 1000);
    }
}
