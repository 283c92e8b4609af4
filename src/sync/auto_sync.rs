//! Background driver deciding when sync passes run.

use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::engine::{SyncEngine, SyncError, SyncReport};
use crate::config::SyncConfig;

/// What prompted a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Interval,
    ConnectivityRegained,
    FocusRegained,
    /// Explicit user request; also lifts a pause.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    TooSoon { wait: Duration },
    FocusThreshold,
    InFlight,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Ran(SyncReport),
    Skipped(SkipReason),
    Failed(SyncError),
}

/// A sync pass the driver can run.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    /// Persist buffered local edits before a pass reads the store.
    async fn flush_pending(&self) -> Result<(), SyncError>;
    async fn run_pass(&self) -> Result<SyncReport, SyncError>;
}

#[async_trait]
impl SyncRunner for SyncEngine {
    async fn flush_pending(&self) -> Result<(), SyncError> {
        Ok(self.store().flush().await?)
    }

    async fn run_pass(&self) -> Result<SyncReport, SyncError> {
        self.sync_all().await
    }
}

/// Cheap reachability check for the issue tracker.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

#[async_trait]
impl ConnectivityProbe for SyncEngine {
    async fn is_reachable(&self) -> bool {
        self.check_tracker().await.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoSyncPolicy {
    pub interval: Duration,
    pub min_interval: Duration,
    pub focus_threshold: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_failures: u32,
}

impl From<&SyncConfig> for AutoSyncPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            min_interval: Duration::from_secs(config.min_interval_secs),
            focus_threshold: Duration::from_secs(config.focus_threshold_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

impl AutoSyncPolicy {
    pub fn base_interval(&self) -> Duration {
        self.interval.max(self.min_interval)
    }

    /// Delay before the next scheduled pass, without jitter.
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.base_interval();
        }
        let factor = 2u32.saturating_pow(consecutive_failures.min(16));
        self.min_interval
            .saturating_mul(factor)
            .min(self.max_backoff)
            .max(self.min_interval)
    }
}

#[derive(Debug, Default)]
struct DriverState {
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
    paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSyncStatus {
    pub paused: bool,
    pub consecutive_failures: u32,
    pub next_delay: Duration,
}

pub struct AutoSync {
    runner: Arc<dyn SyncRunner>,
    policy: AutoSyncPolicy,
    state: Mutex<DriverState>,
}

impl AutoSync {
    pub fn new(runner: Arc<dyn SyncRunner>, policy: AutoSyncPolicy) -> Self {
        Self {
            runner,
            policy,
            state: Mutex::new(DriverState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> AutoSyncStatus {
        let state = self.lock();
        AutoSyncStatus {
            paused: state.paused,
            consecutive_failures: state.consecutive_failures,
            next_delay: self.policy.delay_after(state.consecutive_failures),
        }
    }

    /// Delay until the next scheduled pass, with up to 10% jitter once failing.
    pub fn next_delay(&self) -> Duration {
        let failures = self.lock().consecutive_failures;
        let delay = self.policy.delay_after(failures);
        if failures == 0 {
            return delay;
        }
        let jitter_ms = (delay.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    fn admit(&self, trigger: SyncTrigger, now: Instant) -> Result<(), SkipReason> {
        let mut state = self.lock();
        if trigger == SyncTrigger::Manual {
            if state.paused {
                info!("Auto-sync resumed by manual sync");
            }
            state.paused = false;
            state.consecutive_failures = 0;
            state.last_attempt = Some(now);
            return Ok(());
        }
        if state.paused {
            return Err(SkipReason::Paused);
        }

        if let Some(last) = state.last_attempt {
            let elapsed = now.saturating_duration_since(last);
            if trigger == SyncTrigger::FocusRegained && elapsed < self.policy.focus_threshold {
                return Err(SkipReason::FocusThreshold);
            }
            if elapsed < self.policy.min_interval {
                return Err(SkipReason::TooSoon {
                    wait: self.policy.min_interval - elapsed,
                });
            }
        }
        state.last_attempt = Some(now);
        Ok(())
    }

    fn record(&self, result: &Result<SyncReport, SyncError>) {
        let mut state = self.lock();
        match result {
            Ok(_) => state.consecutive_failures = 0,
            Err(SyncError::InFlight) => {}
            Err(e) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.policy.max_consecutive_failures {
                    state.paused = true;
                    warn!(
                        failures = state.consecutive_failures,
                        error = %e,
                        "Auto-sync paused after repeated failures; run a manual sync to resume"
                    );
                }
            }
        }
    }

    /// Handle one trigger: admission checks, flush, then a pass.
    pub async fn trigger(&self, trigger: SyncTrigger) -> TriggerOutcome {
        if let Err(reason) = self.admit(trigger, Instant::now()) {
            debug!(?trigger, ?reason, "Sync trigger skipped");
            return TriggerOutcome::Skipped(reason);
        }

        let result = match self.runner.flush_pending().await {
            Ok(()) => self.runner.run_pass().await,
            Err(e) => Err(e),
        };
        self.record(&result);
        match result {
            Ok(report) => TriggerOutcome::Ran(report),
            Err(SyncError::InFlight) => TriggerOutcome::Skipped(SkipReason::InFlight),
            Err(e) => TriggerOutcome::Failed(e),
        }
    }

    /// Run until `shutdown` flips to true or the trigger channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<SyncTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = self.policy.base_interval().as_secs(), "Auto-sync started");
        loop {
            let delay = self.next_delay();
            let trigger = tokio::select! {
                _ = tokio::time::sleep(delay) => SyncTrigger::Interval,
                received = triggers.recv() => match received {
                    Some(trigger) => trigger,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match self.trigger(trigger).await {
                TriggerOutcome::Ran(report) => {
                    debug!(?trigger, writes = report.writes(), "Auto-sync pass completed")
                }
                TriggerOutcome::Failed(e) => warn!(?trigger, error = %e, "Auto-sync pass failed"),
                TriggerOutcome::Skipped(_) => {}
            }
        }
        info!("Auto-sync stopped");
    }

    /// Probe the tracker every `every` while passes are failing and send
    /// [`SyncTrigger::ConnectivityRegained`] when an unreachable tracker
    /// answers again. Idle while healthy or paused.
    pub async fn watch_connectivity(
        self: Arc<Self>,
        probe: Arc<dyn ConnectivityProbe>,
        every: Duration,
        triggers: mpsc::Sender<SyncTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut last_reachable: Option<bool> = None;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(every) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let status = self.status();
            if status.paused || status.consecutive_failures == 0 {
                last_reachable = None;
                continue;
            }

            let reachable = probe.is_reachable().await;
            if reachable && last_reachable == Some(false) {
                info!("Tracker reachable again, triggering sync");
                if triggers.send(SyncTrigger::ConnectivityRegained).await.is_err() {
                    break;
                }
            }
            last_reachable = Some(reachable);
        }
        debug!("Connectivity watcher stopped");
    }
}
