//! Resilience harness shared by every engine.
//!
//! Timeouts bound each external call, circuit breakers stop hammering a dependency
//! that keeps failing, and retries smooth over transient errors.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitOpenError, CircuitState, HealthReport, HealthStatus, AI_BREAKER, GITHUB_BREAKER,
};
pub use retry::{with_retry, with_retry_if, RetryConfig};
pub use timeout::{with_timeout, TimeoutError};
