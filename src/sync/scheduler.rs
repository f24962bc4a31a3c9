//! Background Scheduler
//!
//! Runs a periodic task at a fixed interval on a Tokio task. Used for the
//! reachability probe loop and for the periodic queue drain.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Scheduler timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Name used in log lines
    pub name: String,
    pub interval: Duration,
    /// Delay before the first tick; defaults to one full interval
    pub initial_delay: Option<Duration>,
}

impl SchedulerConfig {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            initial_delay: None,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }
}

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

/// Periodic background task runner
#[derive(Clone)]
pub struct BackgroundScheduler {
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    task_handle: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl BackgroundScheduler {
    /// Create new scheduler instance
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            task_handle: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start the background task; `tick` runs once per interval
    pub fn start<F, Fut>(&self, tick: F) -> Result<(), SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = self.config.interval;
        if interval.is_zero() || interval > MAX_INTERVAL {
            return Err(SchedulerError::InvalidInterval(format!(
                "{} interval must be between 1ms and 24h, got {:?}",
                self.config.name, interval
            )));
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        let first_tick = Instant::now() + self.config.initial_delay.unwrap_or(interval);
        let handle = tokio::spawn(Self::scheduler_loop(
            self.config.name.clone(),
            first_tick,
            interval,
            self.running.clone(),
            tick,
        ));

        *self.task_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        log::info!("{} scheduler started (interval: {:?})", self.config.name, interval);
        Ok(())
    }

    /// Stop the background task
    pub fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        if let Some(handle) = self.task_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }

        log::info!("{} scheduler stopped", self.config.name);
        Ok(())
    }

    /// Check if scheduler is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn scheduler_loop<F, Fut>(
        name: String,
        first_tick: Instant,
        period: Duration,
        running: Arc<AtomicBool>,
        mut tick: F,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval_at(first_tick, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if !running.load(Ordering::SeqCst) {
                log::debug!("{} scheduler loop: stopping (running flag is false)", name);
                break;
            }

            log::debug!("{} scheduler tick", name);
            tick().await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
