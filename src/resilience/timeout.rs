use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// An operation exceeded its time budget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{label} timed out after {duration_ms}ms")]
pub struct TimeoutError {
    pub label: String,
    pub duration_ms: u64,
}

impl TimeoutError {
    pub fn new(label: impl Into<String>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Race `operation` against a timer.
///
/// On expiry the future is dropped, which cancels it only if it supports
/// cancellation on drop (child processes spawned with `kill_on_drop` do).
pub async fn with_timeout<F, T, E>(operation: F, duration: Duration, label: &str) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match tokio::time::timeout(duration, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation = %label, duration_ms = duration.as_millis() as u64, "Operation timed out");
            Err(TimeoutError::new(label, duration).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Timeout(TimeoutError),
        Failed,
    }

    impl From<TimeoutError> for TestError {
        fn from(err: TimeoutError) -> Self {
            TestError::Timeout(err)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires_with_duration() {
        let result: Result<(), TestError> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_millis(250),
            "slow op",
        )
        .await;

        assert_eq!(
            result,
            Err(TestError::Timeout(TimeoutError {
                label: "slow op".to_string(),
                duration_ms: 250
            }))
        );
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok: Result<u32, TestError> =
            with_timeout(async { Ok(7) }, Duration::from_secs(1), "fast").await;
        assert_eq!(ok, Ok(7));

        let failed: Result<u32, TestError> =
            with_timeout(async { Err(TestError::Failed) }, Duration::from_secs(1), "fails").await;
        assert_eq!(failed, Err(TestError::Failed));
    }
}
