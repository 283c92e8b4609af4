//! Circuit breaker for failure detection and recovery.
//!
//! A breaker trips after `failure_threshold` consecutive failures and then fails
//! fast until `reset_timeout` has elapsed since the last failure. At that point a
//! single trial call is let through; its outcome closes or re-opens the circuit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker guarding AI inference calls.
pub const AI_BREAKER: &str = "ai-inference";
/// Breaker guarding GitHub API calls for issues and pull requests.
pub const GITHUB_BREAKER: &str = "github";

/// Configuration for a single circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cool-down measured from the last failure before a trial call is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected until the cool-down elapses.
    Open,
    /// One trial request is probing whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Returned instead of calling the dependency while the circuit is open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{name} is cooling down after repeated failures; retry in {}s", retry_after.as_secs().max(1))]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_started: Option<Instant>,
}

/// Point-in-time view of a breaker, used by health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_started: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `operation` through the breaker.
    ///
    /// Fails with [`CircuitOpenError`] without invoking `operation` while the
    /// circuit is open.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.execute_counting(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute), but only errors for which `is_failure`
    /// returns true count against the breaker. Other errors show the dependency
    /// answered and are recorded as successes.
    pub async fn execute_counting<F, Fut, T, E, P>(&self, operation: F, is_failure: P) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
        P: FnOnce(&E) -> bool,
    {
        self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(err)
            }
        }
    }

    /// Decide whether a call may proceed right now.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let reset = self.config.reset_timeout;
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(reset);
                if elapsed >= reset {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started = Some(now);
                    info!(breaker = %self.name, "Circuit half-open, allowing one trial call");
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: reset - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => match inner.trial_started {
                // A trial is in flight. If it never reported back (its future was
                // dropped), a new trial is allowed after another full cool-down.
                Some(started) if now.saturating_duration_since(started) < reset => {
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: reset - now.saturating_duration_since(started),
                    })
                }
                _ => {
                    inner.trial_started = Some(now);
                    Ok(())
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "Circuit closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.trial_started = None;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(breaker = %self.name, "Trial call failed, circuit re-opened");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "Failure threshold reached, circuit opened"
                );
            }
            _ => {
                debug!(breaker = %self.name, failures = inner.failure_count, "Recorded failure");
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Manually close the circuit.
    pub fn reset(&self) {
        self.record_success();
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_after_ms = match (inner.state, inner.last_failure) {
            (CircuitState::Open, Some(at)) => Some(
                self.config
                    .reset_timeout
                    .saturating_sub(Instant::now().saturating_duration_since(at))
                    .as_millis() as u64,
            ),
            _ => None,
        };

        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            retry_after_ms,
        }
    }
}

/// Aggregate health derived from all registered breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub breakers: Vec<BreakerSnapshot>,
}

/// Registry of named breakers with process lifetime.
///
/// Constructed explicitly and shared through `Arc` so tests can build isolated
/// instances.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.defaults)
    }

    /// Fetch a breaker, creating it with `config` on first use. The config of an
    /// existing breaker is left untouched.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }

    pub fn reset_all(&self) {
        for breaker in self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            breaker.reset();
        }
    }

    pub fn health(&self) -> HealthReport {
        let mut breakers: Vec<BreakerSnapshot> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.snapshot())
            .collect();
        breakers.sort_by(|a, b| a.name.cmp(&b.name));

        let open = breakers
            .iter()
            .filter(|b| b.state == CircuitState::Open)
            .count();
        let status = if !breakers.is_empty() && open == breakers.len() {
            HealthStatus::Unhealthy
        } else if breakers
            .iter()
            .any(|b| b.state != CircuitState::Closed || b.failure_count > 0)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport { status, breakers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Open(CircuitOpenError),
        Boom,
    }

    impl From<CircuitOpenError> for TestError {
        fn from(err: CircuitOpenError) -> Self {
            TestError::Open(err)
        }
    }

    fn breaker(threshold: u32, reset_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(reset_secs),
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), TestError> {
        breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Boom)
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), TestError> {
        breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TestError>(())
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, 30);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert_eq!(fail(&breaker, &calls).await, Err(TestError::Boom));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = succeed(&breaker, &calls).await;
        assert!(matches!(result, Err(TestError::Open(ref e)) if e.name == "test"));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke the operation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_reset_closes_on_success() {
        let breaker = breaker(2, 10);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // A second caller during the trial is rejected.
        assert!(breaker.try_acquire().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(succeed(&breaker, &calls).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = breaker(1, 5);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(fail(&breaker, &calls).await, Err(TestError::Boom));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let err = succeed(&breaker, &calls).await.unwrap_err();
        match err {
            TestError::Open(open) => assert!(open.retry_after <= Duration::from_secs(5)),
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3, 5);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert!(succeed(&breaker, &calls).await.is_ok());
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create(AI_BREAKER);
        let b = registry.get_or_create(AI_BREAKER);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_health_levels() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        });
        let ai = registry.get_or_create(AI_BREAKER);
        let gh = registry.get_or_create(GITHUB_BREAKER);
        assert_eq!(registry.health().status, HealthStatus::Healthy);

        ai.record_failure();
        assert_eq!(registry.health().status, HealthStatus::Degraded);

        gh.record_failure();
        assert_eq!(registry.health().status, HealthStatus::Unhealthy);

        registry.reset_all();
        assert_eq!(registry.health().status, HealthStatus::Healthy);
    }
}
